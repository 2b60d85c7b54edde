//! `sieve`: filter statistics for a table and its refinements

use crate::common::TableArgs;
use anyhow::{Context, Result};
use clap::Args;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use straus_core::{FilterReport, IdentityTable, ResidueFilter};

#[derive(Args, Debug)]
pub struct SieveArgs {
    #[command(flatten)]
    pub table: TableArgs,

    /// Further tables to refine with, applied in order
    #[arg(long)]
    pub refine: Vec<PathBuf>,

    /// Refine with the built-in extension table after the --refine tables
    #[arg(long)]
    pub builtin_extension: bool,

    /// Export the reports to CSV
    #[arg(long)]
    pub export: Option<PathBuf>,

    /// Print the reports as JSON lines instead of a table
    #[arg(long)]
    pub json: bool,
}

/// One row of the refinement report
pub struct SieveStep {
    pub table: String,
    pub report: FilterReport,
}

/// Build the base filter, then refine it with each extra table in turn.
pub fn sieve_steps(
    base: &IdentityTable,
    extra: &[IdentityTable],
    args: &TableArgs,
) -> Result<(Vec<SieveStep>, ResidueFilter)> {
    let limits = args.limits();
    let mut filter = ResidueFilter::build(base, &limits)
        .with_context(|| format!("cannot build a filter for {}", base.name()))?;
    let mut steps = vec![SieveStep {
        table: base.name().to_string(),
        report: filter.report(),
    }];
    for table in extra {
        filter = filter
            .refine(table, &limits)
            .with_context(|| format!("cannot refine with {}", table.name()))?;
        steps.push(SieveStep {
            table: table.name().to_string(),
            report: filter.report(),
        });
    }
    Ok((steps, filter))
}

pub fn run(args: SieveArgs) -> Result<()> {
    let base = args.table.load()?;
    let mut extra = Vec::new();
    for path in &args.refine {
        extra.push(
            IdentityTable::load(path)
                .with_context(|| format!("failed to load identity table {}", path.display()))?,
        );
    }
    if args.builtin_extension {
        extra.push(IdentityTable::salez_extension().context("built-in extension table is invalid")?);
    }

    let (steps, filter) = sieve_steps(&base, &extra, &args.table)?;

    if args.json {
        for step in &steps {
            println!("{}", serde_json::to_string(&step.report)?);
        }
    } else {
        print_steps(&steps, &filter);
    }

    if let Some(path) = &args.export {
        export_csv(path, &steps).with_context(|| format!("failed to write {}", path.display()))?;
        println!("\n✓ Results exported to: {}", path.display());
    }
    Ok(())
}

fn print_steps(steps: &[SieveStep], filter: &ResidueFilter) {
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║              Erdős–Straus Modular Filter                     ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
    println!("┌──────────────────────┬─────┬────────────┬──────────┬──────────┬──────────┬──────────┐");
    println!("│ Table                │ Ids │  Modulus M │   Hard   │  Hard %  │ Coprime  │ Cop. %   │");
    println!("├──────────────────────┼─────┼────────────┼──────────┼──────────┼──────────┼──────────┤");
    for step in steps {
        let r = &step.report;
        println!(
            "│ {:<20} │ {:>3} │ {:>10} │ {:>8} │ {:>7.3}% │ {:>8} │ {:>7.3}% │",
            truncate(&step.table, 20),
            r.identities,
            r.modulus,
            r.hard_count,
            100.0 * r.hard_fraction,
            r.coprime_hard_count,
            100.0 * r.coprime_hard_fraction,
        );
    }
    println!("└──────────────────────┴─────┴────────────┴──────────┴──────────┴──────────┴──────────┘");

    let coprime: Vec<u64> = filter.coprime_hard_residues().take(17).collect();
    if coprime.len() <= 16 {
        let list: Vec<String> = coprime.iter().map(|r| r.to_string()).collect();
        println!("\nCoprime hard residues mod {}: {}", filter.modulus(), list.join(", "));
    }
}

fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        s.to_string()
    } else {
        let mut t: String = s.chars().take(width - 1).collect();
        t.push('…');
        t
    }
}

fn export_csv(path: &Path, steps: &[SieveStep]) -> std::io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    writeln!(
        out,
        "step,table,identities,modulus,hard,hard_fraction,totient,coprime_hard,coprime_fraction"
    )?;
    for (i, step) in steps.iter().enumerate() {
        let r = &step.report;
        writeln!(
            out,
            "{},{},{},{},{},{:.9},{},{},{:.9}",
            i,
            step.table,
            r.identities,
            r.modulus,
            r.hard_count,
            r.hard_fraction,
            r.totient,
            r.coprime_hard_count,
            r.coprime_hard_fraction
        )?;
    }
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> TableArgs {
        TableArgs {
            table: None,
            max_modulus: 1 << 28,
        }
    }

    #[test]
    fn test_refinement_steps_shrink() {
        let base = IdentityTable::mordell().unwrap();
        let ext = IdentityTable::salez_extension().unwrap();
        let (steps, filter) = sieve_steps(&base, &[ext], &args()).unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].report.modulus, 840);
        assert_eq!(steps[0].report.coprime_hard_count, 6);
        assert!(steps[1].report.hard_fraction <= steps[0].report.hard_fraction);
        assert_eq!(filter.modulus(), steps[1].report.modulus);
    }

    #[test]
    fn test_export_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sieve.csv");
        let base = IdentityTable::mordell().unwrap();
        let (steps, _) = sieve_steps(&base, &[], &args()).unwrap();
        export_csv(&path, &steps).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("step,table,"));
        assert!(lines[1].starts_with("0,mordell-840,6,840,"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 20), "short");
        assert_eq!(truncate("abcdefghij", 5), "abcd…");
    }
}
