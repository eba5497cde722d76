use std::collections::{BTreeMap, HashSet};

use anyhow::{Context, Result, anyhow};
use log::{info, warn};

use crate::{
    cli::{
        ColumnRemoveArgs, ColumnSetArgs, ColumnsCommand, ConfigArgs, CustomerAddArgs,
        CustomerCommand, CustomerEditArgs, CustomerNameArgs, CustomerNamesArgs, EmailsArgs,
    },
    columns::{ColumnCatalog, ColumnSpec, DataType},
    config::{ConfigStore, MainConfig, parse_concern_list, parse_email_list},
    customer::{Customer, CustomerConfig},
    error::PipelineError,
    storage::LocalStorage,
    table,
};

pub fn execute_customer(command: &CustomerCommand) -> Result<()> {
    match command {
        CustomerCommand::List(args) => list_customers(args),
        CustomerCommand::Show(args) => show_customer(args),
        CustomerCommand::Add(args) => add_customer(args),
        CustomerCommand::Edit(args) => edit_customer(args),
        CustomerCommand::Remove(args) => remove_customer(args),
        CustomerCommand::Enable(args) => set_enabled(args, true),
        CustomerCommand::Disable(args) => set_enabled(args, false),
    }
}

pub fn execute_columns(command: &ColumnsCommand) -> Result<()> {
    match command {
        ColumnsCommand::List(args) => list_columns(args),
        ColumnsCommand::Set(args) => set_column(args),
        ColumnsCommand::Remove(args) => remove_column(args),
    }
}

pub fn execute_emails(args: &EmailsArgs) -> Result<()> {
    let store = open_store(&args.config)?;
    let Some(raw) = &args.set else {
        let main = store.load_main().context("Loading main configuration")?;
        for email in &main.emails {
            println!("{email}");
        }
        return Ok(());
    };
    let emails = parse_email_list(raw)?;
    let mut main = load_main_or_default(&store)?;
    main.emails = emails;
    store
        .save_main(&main)
        .context("Writing main configuration")?;
    info!("Stored {} notification address(es)", main.emails.len());
    Ok(())
}

pub(crate) fn open_store(args: &ConfigArgs) -> Result<ConfigStore<LocalStorage>> {
    if args.config_dir.exists() && !args.config_dir.is_dir() {
        return Err(anyhow!(
            "Configuration path {:?} is not a directory",
            args.config_dir
        ));
    }
    Ok(ConfigStore::new(LocalStorage::new(&args.config_dir)))
}

fn list_customers(args: &ConfigArgs) -> Result<()> {
    let store = open_store(args)?;
    let (configs, failures) = store.list_customers().context("Listing customers")?;
    if configs.is_empty() && failures.is_empty() {
        println!("No customers configured.");
        return Ok(());
    }
    if !configs.is_empty() {
        let (headers, rows) = table::customer_table(&configs);
        table::print_table(&headers, &rows);
    }
    for (name, err) in &failures {
        warn!("Customer '{name}' has an unreadable configuration: {err}");
    }
    Ok(())
}

fn show_customer(args: &CustomerNameArgs) -> Result<()> {
    let store = open_store(&args.config)?;
    let config = store
        .load_customer(&args.name)
        .with_context(|| format!("Loading customer '{}'", args.name))?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn add_customer(args: &CustomerAddArgs) -> Result<()> {
    let store = open_store(&args.config)?;
    let extra = parse_extra_columns(&args.extra)?;
    let config = CustomerConfig {
        name: args.name.clone(),
        concern_ids: parse_concern_list(&args.concern)?.into_iter().collect(),
        source_container: args.source_container.clone(),
        destination_container: args.destination_container.clone(),
        file_format: args.file_format,
        file_encoding: args.file_encoding.clone(),
        extra_columns: (!extra.is_empty()).then_some(extra),
        exclude_columns: exclusion_list(&args.exclude),
        enabled: !args.disabled,
    };
    check_against_base(&store, &config)?;
    let saved = store
        .save_customer(config, None)
        .with_context(|| format!("Creating customer '{}'", args.name))?;
    info!("Customer '{}' created", saved.name);
    Ok(())
}

fn edit_customer(args: &CustomerEditArgs) -> Result<()> {
    let store = open_store(&args.config)?;
    let mut config = store
        .load_customer(&args.name)
        .with_context(|| format!("Loading customer '{}'", args.name))?;
    let original = config.name.clone();

    if let Some(rename) = &args.rename {
        config.name = rename.clone();
    }
    if let Some(concern) = &args.concern {
        config.concern_ids = parse_concern_list(concern)?.into_iter().collect();
    }
    if let Some(source) = &args.source_container {
        config.source_container = source.clone();
    }
    if let Some(destination) = &args.destination_container {
        config.destination_container = destination.clone();
    }
    if let Some(format) = args.file_format {
        config.file_format = format;
    }
    if let Some(encoding) = &args.file_encoding {
        config.file_encoding = encoding.clone();
    }
    if args.clear_extra {
        config.extra_columns = None;
    } else if !args.extra.is_empty() {
        config.extra_columns = Some(parse_extra_columns(&args.extra)?);
    }
    if args.clear_exclude {
        config.exclude_columns = None;
    } else if !args.exclude.is_empty() {
        config.exclude_columns = exclusion_list(&args.exclude);
    }

    check_against_base(&store, &config)?;
    let saved = store
        .save_customer(config, Some(&original))
        .with_context(|| format!("Updating customer '{original}'"))?;
    info!("Customer '{}' updated", saved.name);
    Ok(())
}

fn remove_customer(args: &CustomerNameArgs) -> Result<()> {
    let store = open_store(&args.config)?;
    store
        .delete_customer(&args.name)
        .with_context(|| format!("Removing customer '{}'", args.name))
}

fn set_enabled(args: &CustomerNamesArgs, enabled: bool) -> Result<()> {
    let store = open_store(&args.config)?;
    let statuses: BTreeMap<String, bool> = args
        .names
        .iter()
        .map(|name| (name.trim().to_lowercase(), enabled))
        .collect();
    store.update_enabled(&statuses)?;
    info!(
        "{} {} customer(s)",
        if enabled { "Enabled" } else { "Disabled" },
        statuses.len()
    );
    Ok(())
}

/// Rejects exclusions and display-name clashes up front when the base catalog
/// is available. Without a main configuration the record is stored as given.
fn check_against_base(store: &ConfigStore<LocalStorage>, config: &CustomerConfig) -> Result<()> {
    match store.load_main() {
        Ok(main) => {
            Customer::new(config.clone(), &main.base_columns)
                .with_context(|| format!("Resolving columns of customer '{}'", config.name))?;
            Ok(())
        }
        Err(PipelineError::Configuration(_)) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn exclusion_list(keys: &[String]) -> Option<Vec<String>> {
    let keys: Vec<String> = keys
        .iter()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect();
    (!keys.is_empty()).then_some(keys)
}

fn list_columns(args: &ConfigArgs) -> Result<()> {
    let store = open_store(args)?;
    let main = store.load_main().context("Loading main configuration")?;
    let (headers, rows) = table::column_table(&main.base_columns);
    table::print_table(&headers, &rows);
    Ok(())
}

fn set_column(args: &ColumnSetArgs) -> Result<()> {
    let store = open_store(&args.config)?;
    let mut main = load_main_or_default(&store)?;
    let key = args.key.trim();
    let name = args.name.trim();
    if key.is_empty() || name.is_empty() {
        return Err(anyhow!("Column key and name cannot be empty"));
    }
    if let Some(other) = main
        .base_columns
        .iter()
        .find(|spec| spec.display_name == name && spec.source_key != key)
    {
        return Err(anyhow!(
            "Display name '{name}' is already used by column '{}'",
            other.source_key
        ));
    }
    let data_type = DataType::resolve(&args.dtype, args.decimals, args.length);
    main.base_columns.insert(ColumnSpec::new(key, name, data_type));
    store
        .save_main(&main)
        .context("Writing main configuration")?;
    info!("Base column '{key}' saved as '{name}'");
    Ok(())
}

fn remove_column(args: &ColumnRemoveArgs) -> Result<()> {
    let store = open_store(&args.config)?;
    let mut main = store.load_main().context("Loading main configuration")?;
    if main.base_columns.remove(args.key.trim()).is_none() {
        return Err(anyhow!("Base column '{}' is not defined", args.key));
    }
    store
        .save_main(&main)
        .context("Writing main configuration")?;
    info!("Base column '{}' removed", args.key);
    Ok(())
}

fn load_main_or_default(store: &ConfigStore<LocalStorage>) -> Result<MainConfig> {
    match store.load_main() {
        Ok(main) => Ok(main),
        Err(PipelineError::Configuration(_)) => Ok(MainConfig::default()),
        Err(err) => Err(err).context("Loading main configuration"),
    }
}

/// Parses `key=Name:dtype[:decimals|length]` definitions. The optional
/// number is the rounding precision for float columns and the maximum
/// length for string columns; it is ignored for int columns.
pub fn parse_extra_columns(definitions: &[String]) -> Result<ColumnCatalog> {
    let mut catalog = ColumnCatalog::new();
    let mut names = HashSet::new();
    for raw in definitions {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let (key, rest) = raw
            .split_once('=')
            .ok_or_else(|| anyhow!("Column definition '{raw}' must use the form key=Name:dtype"))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(anyhow!("Column key cannot be empty in definition '{raw}'"));
        }
        if catalog.contains_key(key) {
            return Err(anyhow!("Duplicate column key '{key}' provided"));
        }

        let mut parts = rest.split(':').map(str::trim);
        let name = parts.next().unwrap_or_default();
        if name.is_empty() {
            return Err(anyhow!("Column name cannot be empty in definition '{raw}'"));
        }
        if !names.insert(name.to_string()) {
            return Err(anyhow!("Duplicate column name '{name}' provided"));
        }
        let dtype = parts.next().filter(|d| !d.is_empty()).unwrap_or("string");
        let precision = parts
            .next()
            .map(|value| {
                value
                    .parse::<u32>()
                    .map_err(|_| anyhow!("Column '{key}' has invalid size '{value}'"))
            })
            .transpose()?;
        if parts.next().is_some() {
            return Err(anyhow!("Column definition '{raw}' has too many ':' parts"));
        }

        catalog.insert(ColumnSpec::new(
            key,
            name,
            DataType::resolve(dtype, precision, precision),
        ));
    }
    Ok(catalog)
}
