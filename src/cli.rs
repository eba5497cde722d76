use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::{customer::FileFormat, process::DEFAULT_RETRIES};

#[derive(Debug, Parser)]
#[command(author, version, about = "Publish per-customer transaction extracts and waste reports", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Process the newest extract of every enabled customer and publish the results
    Run(RunArgs),
    /// Print the waste report computed from a customer's stored history
    Report(ReportArgs),
    /// Manage customer configuration records
    #[command(subcommand)]
    Customer(CustomerCommand),
    /// Manage the shared base column catalog
    #[command(subcommand)]
    Columns(ColumnsCommand),
    /// Show or replace the notification address list
    Emails(EmailsArgs),
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// Directory holding main_config.json and customer_config/
    #[arg(short = 'c', long = "config-dir")]
    pub config_dir: PathBuf,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
    /// Root directory of the incoming extracts
    #[arg(short = 's', long = "source-dir")]
    pub source_dir: PathBuf,
    /// Root directory that destination containers are created under
    #[arg(short = 'o', long = "output-dir")]
    pub output_dir: PathBuf,
    /// Directory of the cumulative history tables
    #[arg(long = "history-dir")]
    pub history_dir: PathBuf,
    /// Prefix under the source directory that customer source containers live in
    #[arg(long = "source-root", default_value = crate::process::DEFAULT_SOURCE_ROOT)]
    pub source_root: String,
    /// Extra passes over customers whose run failed
    #[arg(long, default_value_t = DEFAULT_RETRIES)]
    pub retries: usize,
    /// Only process these customers (comma-separated or repeated)
    #[arg(long = "customer", value_delimiter = ',')]
    pub customers: Vec<String>,
}

#[derive(Debug, Args)]
pub struct ReportArgs {
    /// Directory of the cumulative history tables
    #[arg(long = "history-dir")]
    pub history_dir: PathBuf,
    /// Customer whose history is reported
    #[arg(long)]
    pub customer: String,
    /// Write the report here instead of stdout
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum CustomerCommand {
    /// List customer configurations as a table
    List(ConfigArgs),
    /// Print one customer configuration as JSON
    Show(CustomerNameArgs),
    /// Create a customer configuration
    Add(CustomerAddArgs),
    /// Change fields of an existing customer configuration
    Edit(CustomerEditArgs),
    /// Delete a customer configuration
    Remove(CustomerNameArgs),
    /// Enable one or more customers
    Enable(CustomerNamesArgs),
    /// Disable one or more customers
    Disable(CustomerNamesArgs),
}

#[derive(Debug, Args)]
pub struct CustomerNameArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
    /// Customer name
    pub name: String,
}

#[derive(Debug, Args)]
pub struct CustomerNamesArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
    /// Customer names
    #[arg(required = true, num_args = 1..)]
    pub names: Vec<String>,
}

#[derive(Debug, Args)]
pub struct CustomerAddArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
    /// Customer name (stored lower-cased)
    pub name: String,
    /// Comma-separated concern ids whose rows this customer may receive
    #[arg(long = "concern")]
    pub concern: String,
    /// Source container (directory under the source root)
    #[arg(long = "source-container")]
    pub source_container: String,
    /// Destination container for published files
    #[arg(long = "destination-container")]
    pub destination_container: String,
    /// Output file format (csv or json)
    #[arg(long = "format", default_value = "csv", value_parser = parse_file_format)]
    pub file_format: FileFormat,
    /// Text encoding of the published extract
    #[arg(long = "encoding", default_value = "utf-8")]
    pub file_encoding: String,
    /// Extra column definitions of the form `key=Name:dtype[:decimals|length]`
    #[arg(long = "extra", action = clap::ArgAction::Append)]
    pub extra: Vec<String>,
    /// Base column keys left out of the published extract
    #[arg(long = "exclude", value_delimiter = ',')]
    pub exclude: Vec<String>,
    /// Store the customer as disabled
    #[arg(long)]
    pub disabled: bool,
}

#[derive(Debug, Args)]
pub struct CustomerEditArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
    /// Current customer name
    pub name: String,
    /// New customer name
    #[arg(long)]
    pub rename: Option<String>,
    /// Replace the concern id list
    #[arg(long = "concern")]
    pub concern: Option<String>,
    #[arg(long = "source-container")]
    pub source_container: Option<String>,
    #[arg(long = "destination-container")]
    pub destination_container: Option<String>,
    #[arg(long = "format", value_parser = parse_file_format)]
    pub file_format: Option<FileFormat>,
    #[arg(long = "encoding")]
    pub file_encoding: Option<String>,
    /// Replace the extra column definitions (`key=Name:dtype[:decimals|length]`)
    #[arg(long = "extra", action = clap::ArgAction::Append)]
    pub extra: Vec<String>,
    /// Remove every extra column definition
    #[arg(long = "clear-extra", conflicts_with = "extra")]
    pub clear_extra: bool,
    /// Replace the excluded base column keys
    #[arg(long = "exclude", value_delimiter = ',')]
    pub exclude: Vec<String>,
    /// Remove every column exclusion
    #[arg(long = "clear-exclude", conflicts_with = "exclude")]
    pub clear_exclude: bool,
}

#[derive(Debug, Subcommand)]
pub enum ColumnsCommand {
    /// List the base column catalog as a table
    List(ConfigArgs),
    /// Add or replace a base column
    Set(ColumnSetArgs),
    /// Remove a base column
    Remove(ColumnRemoveArgs),
}

#[derive(Debug, Args)]
pub struct ColumnSetArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
    /// Source column key in the incoming extract
    pub key: String,
    /// Output (display) name
    #[arg(long)]
    pub name: String,
    /// Declared type: int*, float*, or string
    #[arg(long, default_value = "string")]
    pub dtype: String,
    /// Rounding precision (float columns only)
    #[arg(long)]
    pub decimals: Option<u32>,
    /// Maximum length (string columns only)
    #[arg(long)]
    pub length: Option<u32>,
}

#[derive(Debug, Args)]
pub struct ColumnRemoveArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
    /// Source column key to remove
    pub key: String,
}

#[derive(Debug, Args)]
pub struct EmailsArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
    /// Comma-separated addresses replacing the stored list
    #[arg(long)]
    pub set: Option<String>,
}

pub fn parse_file_format(value: &str) -> Result<FileFormat, String> {
    value.parse::<FileFormat>().map_err(|err| err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_defaults_are_applied() {
        let cli = Cli::try_parse_from([
            "customer-feeds",
            "run",
            "-c",
            "conf",
            "-s",
            "src",
            "-o",
            "out",
            "--history-dir",
            "hist",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.source_root, "Rajapinta");
        assert_eq!(args.retries, 2);
        assert!(args.customers.is_empty());
    }

    #[test]
    fn format_values_are_validated() {
        assert_eq!(parse_file_format("JSON"), Ok(FileFormat::Json));
        assert!(parse_file_format("xml").is_err());
    }
}
