use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{Error, Result};

const TYPE_COLUMN: &str = "API Name";
const VCPU_COLUMN: &str = "vCPUs";
const MEMORY_COLUMN: &str = "Memory";

static LEADING_INTEGER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d+)").expect("leading integer pattern is valid"));

/// Compute capability of one instance type
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceSpec {
    /// the api name, e.g. r6gd.2xlarge
    pub type_name: String,
    /// the virtual cpu count
    pub vcpu: u32,
    /// the memory in GiB
    pub mem_gb: u32,
}

/// The raw cells of one catalog row, kept as text until looked up
#[derive(Debug, Clone)]
struct CatalogRow {
    vcpus: String,
    memory: String,
}

/// Read-only table of instance types, loaded once at startup.
///
/// The table is the CSV export of ec2instances.info. Only the `API Name`,
/// `vCPUs` and `Memory` columns are used; cells are human readable
/// ("8 vCPUs", "64 GiB") and are only parsed when a type is looked up.
#[derive(Debug)]
pub struct InstanceCatalog {
    source: String,
    rows: HashMap<String, CatalogRow>,
}

impl InstanceCatalog {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            Error::configuration(format!(
                "unable to open instance catalog `{}`: {}",
                path.display(),
                e
            ))
        })?;

        let catalog = Self::from_reader(file, path.display().to_string())?;
        info!(
            "Loaded {} instance types from {}",
            catalog.len(),
            catalog.source
        );
        Ok(catalog)
    }

    pub fn from_reader<R: Read>(reader: R, source: impl Into<String>) -> Result<Self> {
        let source = source.into();
        let mut reader = csv::Reader::from_reader(reader);

        let headers = reader.headers().map_err(|e| {
            Error::configuration(format!("unable to read header of `{}`: {}", source, e))
        })?;
        let column = |name: &str| {
            headers.iter().position(|h| h.trim() == name).ok_or_else(|| {
                Error::configuration(format!("`{}` has no `{}` column", source, name))
            })
        };
        let type_idx = column(TYPE_COLUMN)?;
        let vcpu_idx = column(VCPU_COLUMN)?;
        let mem_idx = column(MEMORY_COLUMN)?;

        let mut rows = HashMap::new();
        for record in reader.records() {
            let record = record.map_err(|e| {
                Error::configuration(format!("corrupt row in `{}`: {}", source, e))
            })?;
            let cell = |idx: usize| record.get(idx).unwrap_or_default().to_string();

            let type_name = cell(type_idx).trim().to_string();
            if type_name.is_empty() {
                continue;
            }
            // the first row for a type wins
            rows.entry(type_name).or_insert_with(|| CatalogRow {
                vcpus: cell(vcpu_idx),
                memory: cell(mem_idx),
            });
        }

        Ok(Self { source, rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn lookup(&self, type_name: &str) -> Result<InstanceSpec> {
        let row = self.rows.get(type_name).ok_or_else(|| {
            Error::configuration(format!(
                "unable to find instance type `{}`. If not a typo, re-export `{}` from ec2instances.info",
                type_name, self.source
            ))
        })?;

        let spec = InstanceSpec {
            type_name: type_name.to_string(),
            vcpu: parse_leading_integer(&row.vcpus).ok_or_else(|| {
                malformed_cell(type_name, VCPU_COLUMN, &row.vcpus)
            })?,
            mem_gb: parse_leading_integer(&row.memory).ok_or_else(|| {
                malformed_cell(type_name, MEMORY_COLUMN, &row.memory)
            })?,
        };
        debug!("Instance {:?}", &spec);
        Ok(spec)
    }
}

/// "16 GiB" -> 16, "8 vCPUs" -> 8
fn parse_leading_integer(cell: &str) -> Option<u32> {
    LEADING_INTEGER
        .captures(cell)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok())
}

fn malformed_cell(type_name: &str, column: &str, cell: &str) -> Error {
    Error::configuration(format!(
        "instance type `{}` has no integer in column `{}` (found `{}`)",
        type_name, column, cell
    ))
}
