//! Per-customer orchestration: take the newest extract, run the editor,
//! store the history, derive the waste report, and publish both artifacts.
//!
//! Both artifacts are rendered before anything is uploaded. If the report
//! upload fails, the extract uploaded just before it is deleted again.

use std::{fmt, time::Instant};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Local};
use log::{error, info, warn};

use crate::{
    builder::{build_csv, build_json},
    config::{ConfigStore, MainConfig},
    customer::{Customer, FileFormat},
    editor,
    esrs::{EsrsDataParser, EsrsReport},
    frame::Frame,
    io_utils::{encode_text, resolve_encoding},
    persistence::{HistoryStore, Persistence},
    storage::{BlobStorage, load_newest_extract, normalize_prefix},
};

pub const DEFAULT_SOURCE_ROOT: &str = "Rajapinta";
pub const DEFAULT_RETRIES: usize = 2;
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";
const REPORT_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Collaborators shared by every customer of one run.
pub struct RunContext<'a, P> {
    pub source: &'a dyn BlobStorage,
    pub destination: &'a dyn BlobStorage,
    pub history: &'a mut HistoryStore<P>,
    pub source_root: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    Skipped,
    NoData,
    Published {
        extract_blob: String,
        report_blob: String,
        rows: usize,
    },
}

impl fmt::Display for ProcessOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessOutcome::Skipped => write!(f, "skipped (disabled)"),
            ProcessOutcome::NoData => write!(f, "no data"),
            ProcessOutcome::Published {
                extract_blob, rows, ..
            } => write!(f, "published {rows} row(s) to {extract_blob}"),
        }
    }
}

/// Rendered artifacts of one customer, ready for upload.
#[derive(Debug, Clone)]
pub struct Artifacts {
    pub extract_blob: String,
    pub extract: Vec<u8>,
    pub extract_content_type: String,
    pub report_blob: String,
    pub report: Vec<u8>,
}

pub fn extract_blob_name(customer: &Customer, now: &DateTime<Local>) -> String {
    format!(
        "{}tapahtumat_{}_{}.{}",
        customer.config.destination_container,
        customer.name(),
        now.format(TIMESTAMP_FORMAT),
        customer.config.file_format.extension()
    )
}

pub fn report_blob_name(customer: &Customer) -> String {
    format!(
        "{}esrs_{}.json",
        customer.config.destination_container,
        customer.name()
    )
}

fn source_prefix(root: &str, customer: &Customer) -> String {
    let root = root.trim_matches('/');
    if root.is_empty() {
        normalize_prefix(&customer.config.source_container)
    } else {
        normalize_prefix(&format!("{root}/{}", customer.config.source_container))
    }
}

/// Renders the publish-ready extract and the report for `customer`.
pub fn render_artifacts(
    customer: &Customer,
    published: &Frame,
    report: &EsrsReport,
    now: &DateTime<Local>,
) -> Result<Artifacts> {
    let encoding_label = &customer.config.file_encoding;
    let encoding = resolve_encoding(Some(encoding_label.as_str()))?;
    let (text, content_type) = match customer.config.file_format {
        FileFormat::Csv => (
            build_csv(published)?,
            format!("text/csv; charset={encoding_label}"),
        ),
        FileFormat::Json => (
            build_json(published, customer.publish_mapping().decimals_map()),
            format!("application/octet-stream; charset={encoding_label}"),
        ),
    };
    let extract = encode_text(&text, encoding)
        .with_context(|| format!("Encoding extract for '{}' as {encoding_label}", customer.name()))?;
    let report = serde_json::to_vec_pretty(report).context("Serializing waste report")?;
    Ok(Artifacts {
        extract_blob: extract_blob_name(customer, now),
        extract,
        extract_content_type: content_type,
        report_blob: report_blob_name(customer),
        report,
    })
}

pub fn process_customer<P: Persistence>(
    ctx: &mut RunContext<'_, P>,
    customer: &Customer,
    now: &DateTime<Local>,
) -> Result<ProcessOutcome> {
    let name = customer.name();
    if !customer.config.enabled {
        info!("Skipping customer {name} as it is not enabled.");
        return Ok(ProcessOutcome::Skipped);
    }
    info!("Processing customer {name}...");

    let prefix = source_prefix(&ctx.source_root, customer);
    let Some(extract) = load_newest_extract(ctx.source, &prefix)
        .with_context(|| format!("Loading newest extract under '{prefix}'"))?
    else {
        info!("No data found for customer {name}.");
        return Ok(ProcessOutcome::NoData);
    };

    let frame = editor::run(&extract.frame, customer)
        .with_context(|| format!("Editing extract '{}'", extract.name))?;
    ctx.history
        .upsert_rows(name, &frame, customer.mapping())
        .with_context(|| format!("Storing history for '{name}'"))?;
    let history = ctx
        .history
        .fetch(name)
        .with_context(|| format!("Fetching history for '{name}'"))?;
    let report = EsrsDataParser::new(&history)
        .parse()
        .with_context(|| format!("Deriving waste report for '{name}'"))?;

    let published = editor::drop_excluded_columns(frame, &customer.excluded_display_names());
    let artifacts = render_artifacts(customer, &published, &report, now)?;

    ctx.destination
        .upload(
            &artifacts.extract_blob,
            &artifacts.extract,
            &artifacts.extract_content_type,
        )
        .with_context(|| format!("Uploading '{}'", artifacts.extract_blob))?;
    if let Err(err) =
        ctx.destination
            .upload(&artifacts.report_blob, &artifacts.report, REPORT_CONTENT_TYPE)
    {
        if let Err(cleanup) = ctx.destination.delete(&artifacts.extract_blob) {
            error!(
                "Failed to remove '{}' after report upload error: {cleanup}",
                artifacts.extract_blob
            );
        }
        return Err(anyhow::Error::new(err)
            .context(format!("Uploading '{}'", artifacts.report_blob)));
    }

    info!("Processed customer {name} successfully.");
    Ok(ProcessOutcome::Published {
        extract_blob: artifacts.extract_blob,
        report_blob: artifacts.report_blob,
        rows: published.len(),
    })
}

/// Final state of one customer after a run.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomerStatus {
    pub name: String,
    pub attempts: usize,
    pub result: std::result::Result<ProcessOutcome, String>,
}

impl CustomerStatus {
    pub fn failed(&self) -> bool {
        self.result.is_err()
    }

    pub fn status_line(&self) -> String {
        match &self.result {
            Ok(outcome) => format!("{}: {outcome}", self.name),
            Err(err) => format!("{}: FAILED after {} attempt(s): {err}", self.name, self.attempts),
        }
    }
}

/// Builds a [`Customer`] for every stored record. Records that cannot be
/// read, or whose column configuration does not resolve, are returned as
/// failed statuses.
pub fn load_customers<S: BlobStorage>(
    store: &ConfigStore<S>,
    main: &MainConfig,
) -> Result<(Vec<Customer>, Vec<CustomerStatus>)> {
    let (configs, unreadable) = store
        .list_customers()
        .context("Listing customer configurations")?;
    let mut customers = Vec::new();
    let mut failures: Vec<CustomerStatus> = unreadable
        .into_iter()
        .map(|(name, err)| CustomerStatus {
            name,
            attempts: 0,
            result: Err(format!("Unreadable configuration: {err}")),
        })
        .collect();
    for config in configs {
        let name = config.name.clone();
        match Customer::new(config, &main.base_columns) {
            Ok(customer) => customers.push(customer),
            Err(err) => {
                error!("Invalid configuration for customer {name}: {err}");
                failures.push(CustomerStatus {
                    name,
                    attempts: 0,
                    result: Err(err.to_string()),
                });
            }
        }
    }
    info!("Loaded {} customers from config.", customers.len());
    Ok((customers, failures))
}

/// Processes `customers` in order. Failed customers are retried in up to
/// `retries` extra passes.
pub fn run_customers<P: Persistence>(
    ctx: &mut RunContext<'_, P>,
    customers: &[Customer],
    retries: usize,
    now: &DateTime<Local>,
) -> Vec<CustomerStatus> {
    let started = Instant::now();
    let mut statuses: Vec<CustomerStatus> = customers
        .iter()
        .map(|c| CustomerStatus {
            name: c.name().to_string(),
            attempts: 0,
            result: Err("not processed".to_string()),
        })
        .collect();

    let mut pending: Vec<usize> = (0..customers.len()).collect();
    for pass in 0..=retries {
        if pending.is_empty() {
            break;
        }
        if pass > 0 {
            warn!("Retrying {} failed customer(s), pass {pass} of {retries}", pending.len());
        }
        let mut failed = Vec::new();
        for idx in pending {
            let customer = &customers[idx];
            let status = &mut statuses[idx];
            status.attempts += 1;
            match process_customer(ctx, customer, now) {
                // The failed extract was archived by the earlier attempt.
                Ok(ProcessOutcome::NoData) if status.result.is_err() && pass > 0 => {
                    warn!(
                        "No new data for customer {} on retry, keeping the earlier error",
                        customer.name()
                    );
                }
                Ok(outcome) => status.result = Ok(outcome),
                Err(err) => {
                    error!("Error processing customer {}: {err:#}", customer.name());
                    status.result = Err(format!("{err:#}"));
                    failed.push(idx);
                }
            }
        }
        pending = failed;
    }

    info!(
        "Elapsed time: {:.2} seconds.",
        started.elapsed().as_secs_f64()
    );
    statuses
}

/// Computes the waste report from a customer's stored history.
pub fn report_for<P: Persistence>(history: &HistoryStore<P>, customer: &str) -> Result<EsrsReport> {
    let frame = history
        .fetch(customer)
        .with_context(|| format!("Fetching history for '{customer}'"))?;
    if frame.is_empty() {
        return Err(anyhow!("No stored history for customer '{customer}'"));
    }
    Ok(EsrsDataParser::new(&frame).parse()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        columns::{ColumnCatalog, ColumnSpec, DataType},
        customer::CustomerConfig,
        persistence::MemoryPersistence,
        storage::MemoryStorage,
    };
    use chrono::TimeZone;

    fn customer(enabled: bool) -> Customer {
        let base: ColumnCatalog = [
            ColumnSpec::new("TapahtumaId", "TapahtumaId", DataType::String { length: None }),
            ColumnSpec::new("PARConcern", "Konserninumero", DataType::String { length: None }),
            ColumnSpec::new("Weight", "Paino", DataType::Float { decimals: Some(2) }),
        ]
        .into_iter()
        .collect();
        let config = CustomerConfig {
            name: "acme".into(),
            concern_ids: [100].into_iter().collect(),
            source_container: "acme/".into(),
            destination_container: "acme-out/".into(),
            file_format: FileFormat::Csv,
            file_encoding: "utf-8".into(),
            extra_columns: None,
            exclude_columns: None,
            enabled,
        };
        Customer::new(config, &base).unwrap()
    }

    fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap()
    }

    /// Memory storage that refuses uploads of report blobs.
    struct ReportRejectingStorage(MemoryStorage);

    impl BlobStorage for ReportRejectingStorage {
        fn list(&self, prefix: &str) -> crate::error::Result<Vec<crate::storage::BlobEntry>> {
            self.0.list(prefix)
        }

        fn download(&self, name: &str) -> crate::error::Result<Vec<u8>> {
            self.0.download(name)
        }

        fn upload(&self, name: &str, data: &[u8], content_type: &str) -> crate::error::Result<()> {
            if name.contains("esrs_") {
                return Err(crate::error::PipelineError::Io(std::io::Error::other(
                    "destination unavailable",
                )));
            }
            self.0.upload(name, data, content_type)
        }

        fn move_to(&self, name: &str, dest_prefix: &str) -> crate::error::Result<String> {
            self.0.move_to(name, dest_prefix)
        }

        fn delete(&self, name: &str) -> crate::error::Result<()> {
            self.0.delete(name)
        }
    }

    #[test]
    fn blob_names_carry_prefix_and_timestamp() {
        let c = customer(true);
        assert_eq!(
            extract_blob_name(&c, &now()),
            "acme-out/tapahtumat_acme_2024-05-06_07-08-09.csv"
        );
        assert_eq!(report_blob_name(&c), "acme-out/esrs_acme.json");
        assert_eq!(source_prefix("Rajapinta/", &c), "Rajapinta/acme/");
        assert_eq!(source_prefix("", &c), "acme/");
    }

    #[test]
    fn disabled_and_empty_customers_publish_nothing() {
        let source = MemoryStorage::new();
        let destination = MemoryStorage::new();
        let mut history = HistoryStore::new(MemoryPersistence::new());
        let mut ctx = RunContext {
            source: &source,
            destination: &destination,
            history: &mut history,
            source_root: DEFAULT_SOURCE_ROOT.to_string(),
        };
        assert_eq!(
            process_customer(&mut ctx, &customer(false), &now()).unwrap(),
            ProcessOutcome::Skipped
        );
        assert_eq!(
            process_customer(&mut ctx, &customer(true), &now()).unwrap(),
            ProcessOutcome::NoData
        );
        assert!(destination.names().is_empty());
    }

    #[test]
    fn failing_customer_is_retried_and_reported() {
        let source = MemoryStorage::new();
        source
            .upload(
                "Rajapinta/acme/extract.csv",
                b"TapahtumaId;PARConcern;Weight\nmeta;;\n1;999;2,5\n",
                "text/csv",
            )
            .unwrap();
        let destination = MemoryStorage::new();
        let mut history = HistoryStore::new(MemoryPersistence::new());
        let mut ctx = RunContext {
            source: &source,
            destination: &destination,
            history: &mut history,
            source_root: DEFAULT_SOURCE_ROOT.to_string(),
        };
        let statuses = run_customers(&mut ctx, &[customer(true)], 2, &now());
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].attempts, 2);
        assert!(statuses[0].failed());
        assert!(statuses[0].status_line().contains("'999'"));
        assert!(source.exists("Rajapinta/acme/history/extract.csv").unwrap());
        assert!(destination.names().is_empty());
    }

    #[test]
    fn failed_report_upload_removes_the_published_extract() {
        let source = MemoryStorage::new();
        source
            .upload(
                "Rajapinta/acme/extract.csv",
                b"TapahtumaId;PARConcern;Weight;EWC;Ryhma;MatHy;EnHy\nmeta;;;;;;\n1;100;2,5;170101;Kierratys;80;20\n",
                "text/csv",
            )
            .unwrap();
        let destination = ReportRejectingStorage(MemoryStorage::new());
        let mut history = HistoryStore::new(MemoryPersistence::new());
        let base: ColumnCatalog = customer(true)
            .mapping()
            .columns()
            .iter()
            .cloned()
            .chain([
                ColumnSpec::new("EWC", "EWCkoodi", DataType::String { length: None }),
                ColumnSpec::new("Ryhma", "Tuoteryhma", DataType::String { length: None }),
                ColumnSpec::new("MatHy", "Materiaalihyotyaste", DataType::Float { decimals: None }),
                ColumnSpec::new("EnHy", "Energiahyotyaste", DataType::Float { decimals: None }),
            ])
            .collect();
        let reporting = Customer::new(customer(true).config, &base).unwrap();
        let mut ctx = RunContext {
            source: &source,
            destination: &destination,
            history: &mut history,
            source_root: DEFAULT_SOURCE_ROOT.to_string(),
        };

        let err = process_customer(&mut ctx, &reporting, &now()).unwrap_err();
        assert!(format!("{err:#}").contains("Uploading 'acme-out/esrs_acme.json'"));
        assert!(format!("{err:#}").contains("destination unavailable"));
        assert!(destination.0.names().is_empty());
    }

    #[test]
    fn unreadable_customer_record_becomes_a_failed_status() {
        let store = ConfigStore::new(MemoryStorage::new());
        store
            .storage()
            .upload("customer_config/broken.json", br#"{"name":"broken"}"#, "application/json")
            .unwrap();
        let main = MainConfig::default();

        let (customers, failures) = load_customers(&store, &main).unwrap();
        assert!(customers.is_empty());
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].name, "broken");
        assert_eq!(failures[0].attempts, 0);
        assert!(failures[0].failed());
        assert!(failures[0].status_line().contains("Unreadable configuration"));
    }
}
