use anyhow::{bail, Context, Result};
use std::env;
use std::path::Path;
use tracing_subscriber::EnvFilter;

use magento_connector::{
    insert_taxes, load_taxes_csv, Binder, ConnectorConfig, RecordId, SqliteStore, TaxMatcher,
};

const USAGE: &str = "usage:
  magento-connector setup [db]
  magento-connector load-taxes <csv> [db]
  magento-connector find-tax <rate> [--included] [db]
  magento-connector to-internal <model> <external_id> [--unwrap] [db]
  magento-connector to-external <model> <record_id> [--wrap] [db]

The database defaults to `database_path` from the config ($CONNECTOR_CONFIG).";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let config = ConnectorConfig::load()?;

    let (flags, positional): (Vec<&str>, Vec<&str>) = args
        .iter()
        .map(String::as_str)
        .partition(|a| a.starts_with("--"));
    let has_flag = |name: &str| flags.iter().any(|f| *f == name);

    match positional.as_slice() {
        ["setup", rest @ ..] => run_setup(&config, rest.first().copied()),
        ["load-taxes", csv, rest @ ..] => run_load_taxes(&config, csv, rest.first().copied()),
        ["find-tax", rate, rest @ ..] => {
            run_find_tax(&config, rate, has_flag("--included"), rest.first().copied())
        }
        ["to-internal", model, external_id, rest @ ..] => run_to_internal(
            &config,
            model,
            external_id,
            has_flag("--unwrap"),
            rest.first().copied(),
        ),
        ["to-external", model, record_id, rest @ ..] => run_to_external(
            &config,
            model,
            record_id,
            has_flag("--wrap"),
            rest.first().copied(),
        ),
        _ => {
            eprintln!("{}", USAGE);
            std::process::exit(2);
        }
    }
}

fn open_store(config: &ConnectorConfig, db: Option<&str>) -> Result<SqliteStore> {
    let path = db.map(Path::new).unwrap_or(config.database_path.as_path());
    SqliteStore::open(path).with_context(|| format!("Failed to open database {}", path.display()))
}

fn run_setup(config: &ConnectorConfig, db: Option<&str>) -> Result<()> {
    open_store(config, db)?;
    println!("✓ Database initialized with WAL mode");
    Ok(())
}

fn run_load_taxes(config: &ConnectorConfig, csv: &str, db: Option<&str>) -> Result<()> {
    let taxes = load_taxes_csv(Path::new(csv))?;
    let store = open_store(config, db)?;
    let inserted = insert_taxes(&store.connection(), &taxes)?;
    println!("✓ Inserted: {} taxes", inserted);
    Ok(())
}

fn run_find_tax(config: &ConnectorConfig, rate: &str, inclusive: bool, db: Option<&str>) -> Result<()> {
    let rate: f64 = rate
        .parse()
        .with_context(|| format!("Invalid rate: {}", rate))?;
    let store = open_store(config, db)?;
    let matcher = TaxMatcher::with_config(&store, config.taxes.clone());

    match matcher.find_tax(rate, inclusive)? {
        Some(tax) => println!("{}\t{}\t{}", tax.id, tax.name, tax.rate),
        None => bail!("No tax found for rate {} (included: {})", rate, inclusive),
    }
    Ok(())
}

fn run_to_internal(
    config: &ConnectorConfig,
    model: &str,
    external_id: &str,
    unwrap: bool,
    db: Option<&str>,
) -> Result<()> {
    let store = open_store(config, db)?;
    let binder = Binder::new(&store, config.binding_model(model)?, &config.backend);

    match binder.to_internal(external_id, unwrap)? {
        Some(id) => println!("{}", id),
        None => bail!("No {} bound to external id {}", model, external_id),
    }
    Ok(())
}

fn run_to_external(
    config: &ConnectorConfig,
    model: &str,
    record_id: &str,
    wrap: bool,
    db: Option<&str>,
) -> Result<()> {
    let record_id: RecordId = record_id
        .parse()
        .with_context(|| format!("Invalid record id: {}", record_id))?;
    let store = open_store(config, db)?;
    let binder = Binder::new(&store, config.binding_model(model)?, &config.backend);

    match binder.to_external(record_id, wrap)? {
        Some(external_id) => println!("{}", external_id),
        None => bail!("{} {} has no external id", model, record_id),
    }
    Ok(())
}
