// Budget Tracker - command line
// Import programming sheets and inspect the stored budget from the terminal.

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use rusqlite::Connection;
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use budget_tracker::{
    alerts, available_years, count_records, create_alert, delete_alert, evaluate_alerts,
    export_programming_csv, find_by_code, find_import, import_history, import_programming_file,
    list_active_alerts, list_procurements, list_programming, list_programming_full,
    open_database, reset_database, seed_default_units, summary_by_goal, summary_by_unit, Config,
    ProgrammingFilter,
};
use budget_tracker::entities::list_units;
use budget_tracker::programming::count_records_for_year;

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";

#[derive(Parser)]
#[command(name = "budget-tracker", version)]
#[command(about = "Import annual budget programming sheets and track execution")]
#[command(
    after_help = "Environment:\n  DATABASE_URL         SQLite file (default budget.db)\n  RUST_LOG             Log level (error, warn, info, debug)"
)]
struct Cli {
    /// SQLite database file (overrides DATABASE_URL)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema
    Init,
    /// Import a programming sheet (xlsx, xls, ods or csv)
    Import {
        file: PathBuf,
        #[arg(long)]
        year: i32,
    },
    /// List programming records
    List {
        #[arg(long)]
        year: Option<i32>,
        #[arg(long)]
        unit: Option<String>,
        #[arg(long)]
        goal: Option<String>,
        /// Show every stored amount
        #[arg(long, default_value_t = false)]
        full: bool,
    },
    /// Totals per unit or per goal for one year
    Summary {
        #[arg(long)]
        year: i32,
        #[arg(long, value_enum, default_value_t = SummaryBy::Unit)]
        by: SummaryBy,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Write the full programming view to a CSV file
    Export {
        out: PathBuf,
        #[arg(long)]
        year: Option<i32>,
        #[arg(long)]
        unit: Option<String>,
    },
    /// List procurements
    Procurements {
        #[arg(long)]
        year: Option<i32>,
    },
    /// Show one procurement with its process milestones
    Procurement { code: String },
    /// Manage execution alerts
    Alerts {
        #[command(subcommand)]
        command: AlertCommand,
    },
    /// Recent import attempts, or one attempt by batch id
    History {
        batch_id: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Insert the default organizational units into an empty database
    Seed,
    /// Delete all data (schema is kept)
    Reset {
        #[arg(long, default_value_t = false)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum AlertCommand {
    List,
    Add {
        name: String,
        #[arg(long, default_value_t = alerts::DEFAULT_THRESHOLD)]
        threshold: f64,
        #[arg(long)]
        unit: Option<String>,
    },
    Remove { id: i64 },
    Check {
        #[arg(long)]
        year: i32,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SummaryBy {
    Unit,
    Goal,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(path) = cli.db {
        config = config.with_database_path(path);
    }

    let mut conn = open_database(&config.database_path)?;
    let json = cli.json;

    match cli.command {
        Commands::Init => {
            println!("✓ Database initialized with WAL mode: {}", config.database_path.display());
        }
        Commands::Import { file, year } => run_import(&mut conn, file, year)?,
        Commands::List { year, unit, goal, full } => {
            let filter = ProgrammingFilter {
                year,
                unit_code: unit,
                goal_code: goal,
            };
            run_list(&conn, &filter, full, json)?;
        }
        Commands::Summary { year, by, limit } => run_summary(&conn, year, by, limit, json)?,
        Commands::Export { out, year, unit } => {
            let filter = ProgrammingFilter {
                year,
                unit_code: unit,
                goal_code: None,
            };
            let rows = list_programming_full(&conn, &filter)?;
            let writer = BufWriter::new(File::create(&out)?);
            let written = export_programming_csv(&rows, writer)?;
            println!("✓ Exported {} rows to {}", written, out.display());
        }
        Commands::Procurements { year } => run_procurements(&conn, year, json)?,
        Commands::Procurement { code } => run_procurement(&conn, &code, json)?,
        Commands::Alerts { command } => run_alerts(&conn, command, json)?,
        Commands::History { batch_id, limit } => run_history(&conn, batch_id.as_deref(), limit, json)?,
        Commands::Seed => {
            let created = seed_default_units(&conn)?;
            if created == 0 {
                println!("Units already present, nothing to seed");
            } else {
                println!("✓ Seeded {} organizational units", created);
            }
            for unit in list_units(&conn, true)? {
                println!("   {:<6} {}", unit.code, unit.display_name());
            }
        }
        Commands::Reset { yes } => {
            if !yes {
                eprintln!("❌ Refusing to delete all data without --yes");
                std::process::exit(1);
            }
            reset_database(&mut conn)?;
            println!("✓ All budget data deleted");
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run_import(conn: &mut Connection, file: PathBuf, year: i32) -> Result<()> {
    println!("📥 Importing programming sheet");
    println!("{}", RULE);
    println!("   File: {}", file.display());
    println!("   Year: {}", year);

    let before = count_records(conn)?;
    let outcome = import_programming_file(conn, &file, year);

    println!("{}", RULE);
    if !outcome.success {
        eprintln!("❌ {}", outcome.message);
        eprintln!("   Batch: {}", outcome.batch_id);
        std::process::exit(1);
    }

    println!("✅ {}", outcome.message);
    println!("   Batch: {}", outcome.batch_id);
    println!("   Records for {}: {}", year, count_records_for_year(conn, year)?);
    println!("   Records in database: {} (was {})", count_records(conn)?, before);
    Ok(())
}

fn run_list(conn: &Connection, filter: &ProgrammingFilter, full: bool, json: bool) -> Result<()> {
    if full {
        let rows = list_programming_full(conn, filter)?;
        if json {
            return print_json(&rows);
        }
        for row in &rows {
            let a = &row.amounts;
            println!(
                "{} {:<6} {:<5} {:<10} {:<40} pim={:.2} cert={:.2} xcert={:.2} comp={:.2} dev={:.2} xdev_comp={:.2} xdev={:.2} total={:.2} saldo={:.2}",
                row.year,
                row.unit_code,
                row.goal_code,
                row.classifier,
                truncate(&row.description, 40),
                a.pim,
                a.certificado,
                a.pim_por_certificar,
                a.compromiso_anual,
                a.devengado_acumulado,
                a.compromiso_por_devengar,
                a.pim_por_devengar,
                a.total_anual,
                a.saldo,
            );
        }
        println!("\n{} records", rows.len());
        return Ok(());
    }

    let rows = list_programming(conn, filter)?;
    if json {
        return print_json(&rows);
    }

    println!(
        "{:<4} {:<6} {:<5} {:<10} {:<40} {:>14} {:>14} {:>14} {:>7}",
        "Año", "UE", "Meta", "Clasif.", "Descripción", "PIM", "Certificado", "Devengado", "Ejec.%"
    );
    for row in &rows {
        println!(
            "{:<4} {:<6} {:<5} {:<10} {:<40} {:>14.2} {:>14.2} {:>14.2} {:>7.2}",
            row.year,
            row.unit_code,
            row.goal_code,
            row.classifier,
            truncate(&row.description, 40),
            row.pim,
            row.certificado,
            row.devengado,
            row.execution_pct,
        );
    }

    let years = available_years(conn)?;
    println!("\n{} records (years with data: {:?})", rows.len(), years);
    Ok(())
}

fn run_summary(conn: &Connection, year: i32, by: SummaryBy, limit: usize, json: bool) -> Result<()> {
    if json {
        return match by {
            SummaryBy::Unit => print_json(&summary_by_unit(conn, year)?),
            SummaryBy::Goal => print_json(&summary_by_goal(conn, year, limit)?),
        };
    }

    println!("📊 Execution summary {}", year);
    println!("{}", RULE);

    match by {
        SummaryBy::Unit => {
            for unit in summary_by_unit(conn, year)? {
                println!(
                    "{:<6} {:>14.2} pim  {:>14.2} devengado  {:>5.1}%  {}",
                    unit.unit_code,
                    unit.pim,
                    unit.devengado,
                    unit.progress_pct,
                    unit.band.as_str()
                );
            }
        }
        SummaryBy::Goal => {
            for goal in summary_by_goal(conn, year, limit)? {
                println!(
                    "{:<5} {:<40} {:>14.2} pim  {:>5.1}%",
                    goal.goal_code,
                    truncate(&goal.goal, 40),
                    goal.pim,
                    goal.progress_pct
                );
            }
        }
    }

    Ok(())
}

fn run_procurements(conn: &Connection, year: Option<i32>, json: bool) -> Result<()> {
    let views = list_procurements(conn, year)?;
    if json {
        return print_json(&views);
    }

    for p in &views {
        println!(
            "{} {:<6} {:<14} {:<12} {:<40} ref={:.2} adj={:.2} ({:.2}%)",
            p.year,
            p.unit_code,
            p.code,
            p.status.as_str(),
            truncate(&p.description, 40),
            p.reference_amount,
            p.awarded_amount,
            p.award_pct
        );
    }
    println!("\n{} procurements", views.len());
    Ok(())
}

fn run_procurement(conn: &Connection, code: &str, json: bool) -> Result<()> {
    let record = match find_by_code(conn, code)? {
        Some(record) => record,
        None => {
            eprintln!("❌ No procurement with code {}", code);
            std::process::exit(1);
        }
    };

    if json {
        return print_json(&record);
    }

    let p = &record.procurement;
    println!("🛒 {} - {}", code, p.description);
    println!("{}", RULE);
    println!("   Year:      {}", p.year);
    println!("   Status:    {}", p.status);
    println!("   Process:   {}", p.process_type.as_deref().unwrap_or("No especificado"));
    println!("   Reference: {:.2}", p.reference_amount);
    println!("   Awarded:   {:.2} ({:.2}%)", p.awarded_amount, p.award_pct());
    println!("   Supplier:  {}", p.supplier.as_deref().unwrap_or("Sin proveedor"));

    if let Some(detail) = &record.detail {
        println!(
            "   Requirements: {}/{} ({:.2}%)",
            detail.acquired_requirements,
            detail.total_requirements,
            detail.requirements_pct()
        );
    }

    if !record.steps.is_empty() {
        println!("\n   Milestones:");
        for step in &record.steps {
            let end = step
                .end_date
                .map(|d| d.to_string())
                .unwrap_or_else(|| "open".to_string());
            println!(
                "   {:>2}. {:<30} {:<15} {} → {} ({} days)",
                step.order, step.milestone, step.responsible_area, step.start_date, end, step.elapsed_days
            );
        }
    }

    Ok(())
}

fn run_alerts(conn: &Connection, command: AlertCommand, json: bool) -> Result<()> {
    match command {
        AlertCommand::List => {
            let alerts = list_active_alerts(conn)?;
            if json {
                return print_json(&alerts);
            }
            for alert in alerts {
                println!("{:>4}  {:<30} {:<6} < {:.1}%", alert.id, alert.name, alert.scope(), alert.threshold_pct);
            }
        }
        AlertCommand::Add { name, threshold, unit } => {
            let alert = create_alert(conn, &name, unit.as_deref(), threshold)?;
            println!("✓ Alert {} created ({} < {:.1}%)", alert.id, alert.scope(), alert.threshold_pct);
        }
        AlertCommand::Remove { id } => {
            if delete_alert(conn, id)? {
                println!("✓ Alert {} removed", id);
            } else {
                eprintln!("❌ No alert with id {}", id);
                std::process::exit(1);
            }
        }
        AlertCommand::Check { year } => {
            let checks = evaluate_alerts(conn, year)?;
            if json {
                return print_json(&checks);
            }
            let triggered = checks.iter().filter(|c| c.triggered).count();
            for check in &checks {
                let mark = if check.triggered { "⚠️ " } else { "✓ " };
                println!(
                    "{} {:<30} {:<6} {:>5.1}% (threshold {:.1}%)",
                    mark,
                    check.alert.name,
                    check.alert.scope(),
                    check.progress_pct,
                    check.alert.threshold_pct
                );
            }
            println!("\n{} of {} alerts triggered for {}", triggered, checks.len(), year);
        }
    }

    Ok(())
}

fn run_history(conn: &Connection, batch_id: Option<&str>, limit: usize, json: bool) -> Result<()> {
    if let Some(batch_id) = batch_id {
        let entry = match find_import(conn, batch_id)? {
            Some(entry) => entry,
            None => {
                eprintln!("❌ No import with batch id {}", batch_id);
                std::process::exit(1);
            }
        };
        if json {
            return print_json(&entry);
        }

        let mark = if entry.success { "✅" } else { "❌" };
        println!("{} Import {}", mark, entry.batch_id);
        println!("{}", RULE);
        println!("   When:    {}", entry.created_at.format("%Y-%m-%d %H:%M:%S"));
        println!("   Year:    {}", entry.year);
        println!("   File:    {}", entry.source_name);
        println!("   SHA-256: {}", entry.source_sha256.as_deref().unwrap_or("-"));
        println!("   Records: {}", entry.records_created);
        println!("   {}", entry.message);
        return Ok(());
    }

    let entries = import_history(conn, limit)?;
    if json {
        return print_json(&entries);
    }

    for entry in entries {
        let mark = if entry.success { "✓" } else { "❌" };
        println!(
            "{} {} {} {:<30} {}",
            mark,
            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
            entry.year,
            truncate(&entry.source_name, 30),
            entry.message
        );
    }
    Ok(())
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}
