use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use cardlens_core::{PageSource, TxnKind};
use cardlens_ingest::{Statement, StatementParser, TemplateDetector};

mod source;

use source::JsonPageSource;

#[derive(Parser, Debug)]
#[command(
    name = "cardlens",
    version,
    about = "Template-driven credit-card statement extractor"
)]
struct Cli {
    /// Directory of template definitions
    #[arg(long, default_value = "templates", global = true)]
    templates_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse a statement token dump into validated statement JSON
    Parse {
        /// Path to the token dump (JSON pages of positioned words)
        input: PathBuf,

        /// Template ID to use (default: auto-detect)
        #[arg(long, short = 't')]
        template: Option<String>,

        /// Output JSON file path (default: stdout)
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
    },

    /// Detect which template matches a statement
    Detect {
        /// Path to the token dump
        input: PathBuf,
    },

    /// List loaded templates
    Templates,

    /// Validate a statement JSON file against the schema and its invariants
    Validate {
        /// Path to the statement JSON
        input: PathBuf,
    },

    /// Export a statement JSON file's transactions as CSV
    Export {
        /// Path to the statement JSON
        input: PathBuf,

        /// Output CSV file path
        #[arg(long, short = 'o')]
        out: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let Cli {
        templates_dir,
        command,
    } = Cli::parse();

    match command {
        Command::Parse {
            input,
            template,
            out,
        } => run_parse(&templates_dir, &input, template, out),
        Command::Detect { input } => run_detect(&templates_dir, &input),
        Command::Templates => run_templates(&templates_dir),
        Command::Validate { input } => run_validate(&input),
        Command::Export { input, out } => run_export(&input, &out),
    }
}

fn run_parse(
    templates_dir: &Path,
    input: &Path,
    template: Option<String>,
    out: Option<PathBuf>,
) -> Result<()> {
    let detector = TemplateDetector::from_dir(templates_dir);
    let source = JsonPageSource;
    let pages = source.load_pages(input)?;

    let template_id = match template {
        Some(id) => id,
        None => detector
            .detect(&pages)
            .map(str::to_string)
            .context("could not detect a template for this document")?,
    };
    let config = detector.require(&template_id)?;

    let statement = StatementParser::new(config).parse(&source, input)?;
    let json = serde_json::to_string_pretty(&statement)?;

    match out {
        Some(path) => {
            fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
            println!("Parsed successfully. Output written to: {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn run_detect(templates_dir: &Path, input: &Path) -> Result<()> {
    let detector = TemplateDetector::from_dir(templates_dir);
    let pages = JsonPageSource.load_pages(input)?;

    match detector.detect(&pages) {
        Some(template_id) => {
            println!("Detected template: {template_id}");
            Ok(())
        }
        None => bail!("no matching template found"),
    }
}

fn run_templates(templates_dir: &Path) -> Result<()> {
    let detector = TemplateDetector::from_dir(templates_dir);
    if detector.templates().is_empty() {
        println!("No templates found in {}", templates_dir.display());
        return Ok(());
    }
    for template in detector.templates() {
        println!("{}  {}", template.template_id, template.bank);
    }
    Ok(())
}

fn run_validate(input: &Path) -> Result<()> {
    let statement = read_statement(input)?;
    statement.validate()?;

    println!("Statement is valid");
    println!("Bank: {}", statement.meta.bank);
    println!("Statement date: {}", statement.meta.statement_date);
    println!("Transactions: {}", statement.transactions.len());
    println!("Instalments: {}", statement.instalments.len());
    Ok(())
}

fn run_export(input: &Path, out: &Path) -> Result<()> {
    let statement = read_statement(input)?;

    let mut writer =
        csv::Writer::from_path(out).with_context(|| format!("creating {}", out.display()))?;
    writer.write_record([
        "transaction_date",
        "posting_date",
        "description",
        "amount",
        "currency",
        "type",
        "reference",
    ])?;
    for txn in &statement.transactions {
        let kind = match txn.kind {
            TxnKind::Purchase => "purchase",
            TxnKind::Payment => "payment",
        };
        writer.write_record([
            txn.transaction_date.to_string(),
            txn.posting_date.to_string(),
            txn.description.clone(),
            txn.amount.to_string(),
            txn.currency.clone(),
            kind.to_string(),
            txn.reference.clone().unwrap_or_default(),
        ])?;
    }
    writer.flush()?;

    println!(
        "Exported {} transactions to {}",
        statement.transactions.len(),
        out.display()
    );
    Ok(())
}

fn read_statement(path: &Path) -> Result<Statement> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("{} does not match the statement schema", path.display()))
}
