#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::{TempDir, tempdir};

pub const MAIN_CONFIG: &str = r#"{
    "base_columns": {
        "TapahtumaId": {"name": "TapahtumaId", "dtype": "string", "length": 255},
        "PARConcern": {"name": "Konserninumero", "dtype": "string"},
        "Pvm": {"name": "Pvm", "dtype": "string"},
        "EWC": {"name": "EWCkoodi", "dtype": "string"},
        "Ryhma": {"name": "Tuoteryhma", "dtype": "string"},
        "Paino": {"name": "Paino", "dtype": "float64", "decimals": 3},
        "MatHy": {"name": "Materiaalihyotyaste", "dtype": "float64", "decimals": 1},
        "EnHy": {"name": "Energiahyotyaste", "dtype": "float64", "decimals": 1},
        "Hinta": {"name": "Hinta", "dtype": "float64", "decimals": 2}
    }
}"#;

/// Header, metadata row, and three transactions in the source layout.
pub const EXTRACT: &str = "TapahtumaId;PARConcern;Pvm;EWC;Ryhma;Paino;MatHy;EnHy;Hinta;Ylim\n\
meta;;;;;;;;;\n\
T1;100;15.01.2024;170101;BET;2,5;80;10;12,5;x\n\
T2;100;03.02.2024;170601*;AS;1,0;0;0;99;x\n\
T3;100;10.01.2024;200301;SEK;0;50;50;1;x\n";

/// Scratch directory laid out as config, source, output, and history roots.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn config_dir(&self) -> PathBuf {
        self.path().join("config")
    }

    pub fn source_dir(&self) -> PathBuf {
        self.path().join("source")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.path().join("output")
    }

    pub fn history_dir(&self) -> PathBuf {
        self.path().join("history")
    }

    /// Writes `contents` under the workspace, creating parent directories.
    pub fn write(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dirs");
        }
        fs::write(&path, contents).expect("write workspace file");
        path
    }

    pub fn write_main_config(&self) {
        self.write("config/main_config.json", MAIN_CONFIG.as_bytes());
    }

    pub fn write_customer(&self, name: &str, format: &str, exclude: &[&str]) {
        let record = serde_json::json!({
            "name": name,
            "konserni": [100],
            "source_container": format!("{name}/"),
            "destination_container": format!("{name}-out/"),
            "file_format": format,
            "file_encoding": "utf-8",
            "extra_columns": null,
            "exclude_columns": if exclude.is_empty() { serde_json::Value::Null } else { serde_json::json!(exclude) },
            "enabled": true
        });
        self.write(
            &format!("config/customer_config/{name}.json"),
            serde_json::to_string_pretty(&record)
                .expect("serialize customer")
                .as_bytes(),
        );
    }

    pub fn write_extract(&self, customer: &str, file: &str, contents: &str) -> PathBuf {
        let (encoded, _, _) = encoding_rs::WINDOWS_1252.encode(contents);
        self.write(&format!("source/Rajapinta/{customer}/{file}"), &encoded)
    }

    /// Files directly under `dir`, sorted by name.
    pub fn files_in(&self, dir: &Path) -> Vec<String> {
        let Ok(entries) = fs::read_dir(dir) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}
