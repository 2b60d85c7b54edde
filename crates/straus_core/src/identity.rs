//! Parametric identity families
//!
//! Each family is a closed form for `4/n = 1/a + 1/b + 1/c` valid on a whole
//! residue class `n ≡ r (mod q)`. A family alone is not enough to evaluate the
//! form: every resolved residue needs a [`Witness`], a handful of small
//! constants that make each division in the form exact for the class. Witnesses
//! are derived once when a table is loaded, so evaluation never searches.
//!
//! Families:
//!
//! * `halving`: n even, `(n/2, n, n)`.
//! * `ceil-quarter` with parameter m: `x = (n + m) / 4` and
//!   `4/n - 1/x = m / (n x)`, split into two unit fractions by the witness
//!   `(c1, c2)` with `c1 | x`, `c2 | x`. The constant form uses
//!   `t = (c1 + c2) / m`, the scaled form `t = (c1 + c2 n) / m`.
//! * `n-multiple` with parameter s: `a = n s`, `4/n - 1/a = (4s - 1) / (n s)`,
//!   witness `(c1, c2)` dividing s with `t = (c1 + c2 n) / (4s - 1)`.

use crate::error::{Error, Result};
use crate::natural::Natural;
use serde::{Deserialize, Serialize};

/// Named closed-form family with its parameters
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(tag = "family", rename_all = "kebab-case")]
pub enum Family {
    Halving,
    CeilQuarter { m: u64 },
    NMultiple { s: u64 },
}

/// Constants instantiating a family for one residue class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Witness {
    Halving,
    CeilQuarter { c1: u64, c2: u64, scaled: bool },
    NMultiple { c1: u64, c2: u64 },
}

impl Family {
    /// Parameter sanity independent of any modulus.
    pub fn check_params(&self) -> std::result::Result<(), String> {
        match *self {
            Family::Halving => Ok(()),
            Family::CeilQuarter { m } if m == 0 => Err("ceil-quarter needs m >= 1".into()),
            Family::CeilQuarter { .. } => Ok(()),
            Family::NMultiple { s } if s == 0 => Err("n-multiple needs s >= 1".into()),
            Family::NMultiple { s } => s
                .checked_mul(4)
                .map(|_| ())
                .ok_or_else(|| format!("n-multiple parameter s = {} too large", s)),
        }
    }

    /// Find constants that make this family exact for every `n ≡ r (mod q)`.
    ///
    /// Returns `None` when the class is not covered by the family.
    pub fn derive_witness(&self, q: u64, r: u64) -> Option<Witness> {
        if q == 0 || r >= q {
            return None;
        }
        match *self {
            Family::Halving => (q % 2 == 0 && r % 2 == 0).then_some(Witness::Halving),
            Family::CeilQuarter { m } => ceil_quarter_witness(m, q, r),
            Family::NMultiple { s } => n_multiple_witness(s, q, r),
        }
    }

    pub fn name(&self) -> String {
        match self {
            Family::Halving => "halving".to_string(),
            Family::CeilQuarter { m } => format!("ceil-quarter(m={})", m),
            Family::NMultiple { s } => format!("n-multiple(s={})", s),
        }
    }
}

fn divisors(n: u64) -> Vec<u64> {
    let mut small = Vec::new();
    let mut large = Vec::new();
    let mut d = 1u64;
    while d <= n / d {
        if n % d == 0 {
            small.push(d);
            if d != n / d {
                large.push(n / d);
            }
        }
        d += 1;
    }
    small.extend(large.into_iter().rev());
    small
}

fn ceil_quarter_witness(m: u64, q: u64, r: u64) -> Option<Witness> {
    if m == 0 || q % 4 != 0 {
        return None;
    }
    let rm = u128::from(r) + u128::from(m);
    if rm % 4 != 0 {
        return None;
    }
    // c must divide x = (n + m) / 4 for every n in the class
    let usable: Vec<u64> = divisors(q / 4)
        .into_iter()
        .filter(|&c| rm % (4 * u128::from(c)) == 0)
        .collect();

    let m128 = u128::from(m);
    for &c1 in &usable {
        for &c2 in &usable {
            if (u128::from(c1) + u128::from(c2)) % m128 == 0 {
                return Some(Witness::CeilQuarter { c1, c2, scaled: false });
            }
        }
    }
    if q % m != 0 {
        return None;
    }
    for &c1 in &usable {
        for &c2 in &usable {
            if (u128::from(c1) + u128::from(c2) * u128::from(r)) % m128 == 0 {
                return Some(Witness::CeilQuarter { c1, c2, scaled: true });
            }
        }
    }
    None
}

fn n_multiple_witness(s: u64, q: u64, r: u64) -> Option<Witness> {
    let k = s.checked_mul(4)?.checked_sub(1)?;
    if k == 0 || q % k != 0 {
        return None;
    }
    let ds = divisors(s);
    for &c1 in &ds {
        for &c2 in &ds {
            if (u128::from(c1) + u128::from(c2) * u128::from(r)) % u128::from(k) == 0 {
                return Some(Witness::NMultiple { c1, c2 });
            }
        }
    }
    None
}

fn exact(num: &Natural, den: u64, what: &str, n: u64) -> Result<Natural> {
    num.div_exact(&Natural::from(den)).ok_or_else(|| {
        Error::Arithmetic(format!("{} not divisible by {} for n = {}", what, den, n))
    })
}

/// Evaluate the closed form for `n`, returning the unsorted triple.
///
/// `witness` must have been derived for the residue class of `n`; an inexact
/// division means it was not, and is reported as an arithmetic error.
pub fn evaluate(family: Family, witness: Witness, n: u64) -> Result<[Natural; 3]> {
    let nn = Natural::from(n);
    match (family, witness) {
        (Family::Halving, Witness::Halving) => {
            let half = exact(&nn, 2, "n", n)?;
            Ok([half, nn.clone(), nn])
        }
        (Family::CeilQuarter { m }, Witness::CeilQuarter { c1, c2, scaled }) => {
            let x = exact(&(&nn + m), 4, "n + m", n)?;
            let d2 = if scaled { &nn * c2 } else { Natural::from(c2) };
            let t = exact(&(&d2 + c1), m, "c1 + d2", n)?;
            let nxt = &(&nn * &x) * &t;
            let b = exact(&nxt, c1, "n x t", n)?;
            let c = nxt.div_exact(&d2).ok_or_else(|| {
                Error::Arithmetic(format!("n x t not divisible by {} for n = {}", d2, n))
            })?;
            Ok([x, b, c])
        }
        (Family::NMultiple { s }, Witness::NMultiple { c1, c2 }) => {
            let k = 4 * s - 1;
            let a = &nn * s;
            let t = exact(&(&(&nn * c2) + c1), k, "c1 + c2 n", n)?;
            let st = &Natural::from(s) * &t;
            let b = exact(&(&nn * &st), c1, "n s t", n)?;
            let c = exact(&st, c2, "s t", n)?;
            Ok([a, b, c])
        }
        (family, witness) => Err(Error::Arithmetic(format!(
            "witness {:?} does not belong to family {}",
            witness,
            family.name()
        ))),
    }
}

/// A validated identity: modulus, resolved residues and their witnesses
#[derive(Debug, Clone)]
pub struct Identity {
    pub modulus: u64,
    pub family: Family,
    pub source: Option<String>,
    /// Sorted, distinct, each `< modulus`
    residues: Vec<u64>,
    witnesses: Vec<Witness>,
}

impl Identity {
    /// Validate `residues` against `family`, deriving one witness each.
    pub fn new(
        modulus: u64,
        residues: &[u64],
        family: Family,
        source: Option<String>,
    ) -> std::result::Result<Self, String> {
        if modulus == 0 {
            return Err("modulus must be at least 1".into());
        }
        family.check_params()?;

        let mut sorted = residues.to_vec();
        sorted.sort_unstable();
        if let Some(w) = sorted.windows(2).find(|w| w[0] == w[1]) {
            return Err(format!("duplicate residue {}", w[0]));
        }
        if let Some(&r) = sorted.iter().find(|&&r| r >= modulus) {
            return Err(format!("residue {} is not below modulus {}", r, modulus));
        }

        let mut witnesses = Vec::with_capacity(sorted.len());
        for &r in &sorted {
            let w = family.derive_witness(modulus, r).ok_or_else(|| {
                format!(
                    "{} does not resolve n ≡ {} (mod {})",
                    family.name(),
                    r,
                    modulus
                )
            })?;
            witnesses.push(w);
        }

        Ok(Self {
            modulus,
            family,
            source,
            residues: sorted,
            witnesses,
        })
    }

    pub fn residues(&self) -> &[u64] {
        &self.residues
    }

    /// Witness for `n` if this identity resolves its class.
    pub fn witness_for(&self, n: u64) -> Option<Witness> {
        let r = n % self.modulus;
        self.residues
            .binary_search(&r)
            .ok()
            .map(|i| self.witnesses[i])
    }

    /// True when the residue `r` (already reduced mod `modulus`) is resolved.
    pub fn resolves(&self, r: u64) -> bool {
        self.residues.binary_search(&r).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn holds(n: u64, t: &[Natural; 3]) -> bool {
        let nn = Natural::from(n);
        let lhs = &(&(&t[0] * &t[1]) * &t[2]) * 4;
        let rhs = &nn * &(&(&(&t[1] * &t[2]) + &(&t[0] * &t[2])) + &(&t[0] * &t[1]));
        lhs == rhs
    }

    fn check_class(family: Family, q: u64, r: u64) {
        let w = family
            .derive_witness(q, r)
            .unwrap_or_else(|| panic!("no witness for {:?} {} mod {}", family, r, q));
        for i in 0..200u64 {
            let n = r + q * i;
            if n == 0 {
                continue;
            }
            let t = evaluate(family, w, n).unwrap();
            assert!(holds(n, &t), "{:?} fails at n = {}", family, n);
        }
    }

    #[test]
    fn test_mordell_classes() {
        check_class(Family::Halving, 2, 0);
        check_class(Family::CeilQuarter { m: 1 }, 4, 3);
        check_class(Family::CeilQuarter { m: 3 }, 8, 5);
        check_class(Family::NMultiple { s: 1 }, 3, 2);
        for r in [3, 5, 6] {
            check_class(Family::NMultiple { s: 2 }, 7, r);
        }
        for r in [7, 11, 13, 14] {
            check_class(Family::NMultiple { s: 4 }, 15, r);
        }
    }

    #[test]
    fn test_extension_classes() {
        for r in [7, 8, 10] {
            check_class(Family::NMultiple { s: 3 }, 11, r);
        }
        for r in [14, 15, 18] {
            check_class(Family::NMultiple { s: 5 }, 19, r);
        }
        for r in [7, 10, 11, 15, 17, 19, 20, 21, 22] {
            check_class(Family::NMultiple { s: 6 }, 23, r);
        }
        for r in [57, 113, 137] {
            check_class(Family::CeilQuarter { m: 23 }, 184, r);
        }
    }

    #[test]
    fn test_mod_eight_witness_and_five() {
        let family = Family::CeilQuarter { m: 3 };
        let w = family.derive_witness(8, 5).unwrap();
        assert_eq!(w, Witness::CeilQuarter { c1: 1, c2: 2, scaled: false });
        let t = evaluate(family, w, 5).unwrap();
        let mut v: Vec<u64> = t.iter().map(|x| x.to_u64().unwrap()).collect();
        v.sort_unstable();
        assert_eq!(v, vec![2, 5, 10]);
    }

    #[test]
    fn test_scaled_witness_needed_mod_184() {
        let w = Family::CeilQuarter { m: 23 }.derive_witness(184, 57).unwrap();
        assert!(matches!(w, Witness::CeilQuarter { scaled: true, .. }));
    }

    #[test]
    fn test_uncovered_classes_have_no_witness() {
        assert!(Family::Halving.derive_witness(2, 1).is_none());
        assert!(Family::NMultiple { s: 2 }.derive_witness(7, 1).is_none());
        assert!(Family::NMultiple { s: 2 }.derive_witness(6, 3).is_none());
        assert!(Family::CeilQuarter { m: 1 }.derive_witness(4, 1).is_none());
        assert!(Family::CeilQuarter { m: 1 }.derive_witness(6, 3).is_none());
    }

    #[test]
    fn test_large_n_promotes() {
        let n = 18_446_744_073_709_551_557u64; // ≡ 5 (mod 8)
        let family = Family::CeilQuarter { m: 3 };
        let w = family.derive_witness(8, n % 8).unwrap();
        let t = evaluate(family, w, n).unwrap();
        assert!(holds(n, &t));
    }

    #[test]
    fn test_identity_validation() {
        assert!(Identity::new(0, &[], Family::Halving, None).is_err());
        assert!(Identity::new(2, &[2], Family::Halving, None).is_err());
        assert!(Identity::new(2, &[0, 0], Family::Halving, None).is_err());
        assert!(Identity::new(2, &[1], Family::Halving, None).is_err());
        assert!(Identity::new(7, &[3], Family::NMultiple { s: 0 }, None).is_err());

        let id = Identity::new(7, &[6, 3, 5], Family::NMultiple { s: 2 }, None).unwrap();
        assert_eq!(id.residues(), &[3, 5, 6]);
        assert!(id.witness_for(13).is_some());
        assert!(id.witness_for(29).is_none());
    }

    #[test]
    fn test_family_serde_shape() {
        let json = serde_json::to_string(&Family::CeilQuarter { m: 3 }).unwrap();
        assert_eq!(json, r#"{"family":"ceil-quarter","m":3}"#);
        let f: Family = serde_json::from_str(r#"{"family":"n-multiple","s":4}"#).unwrap();
        assert_eq!(f, Family::NMultiple { s: 4 });
        let h: Family = serde_json::from_str(r#"{"family":"halving"}"#).unwrap();
        assert_eq!(h, Family::Halving);
    }
}
