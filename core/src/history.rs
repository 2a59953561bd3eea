use crate::error::Result;
use crate::settings::clamp_retention;
use crate::store::{keys, OptionStore};
use crate::types::Risk;
use serde::{Deserialize, Serialize};

/// Snapshot of one scan. `run_at` is unique across the history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub run_at: i64,
    pub risks: Vec<Risk>,
}

#[derive(Serialize)]
struct HistoryExport<'a> {
    run_at: i64,
    risk_count: usize,
    risks: &'a [Risk],
}

impl HistoryRecord {
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&HistoryExport {
            run_at: self.run_at,
            risk_count: self.risks.len(),
            risks: &self.risks,
        })
    }

    pub fn to_csv(&self) -> String {
        let mut out = String::from(
            "run_at,plugin_slug,plugin_name,local_version,remote_version,reasons\r\n",
        );

        for risk in &self.risks {
            let row = [
                self.run_at.to_string(),
                risk.plugin_slug.clone(),
                risk.plugin_name.clone(),
                risk.local_version.clone(),
                risk.remote_version.clone().unwrap_or_default(),
                risk.reasons.join("; "),
            ];
            let fields: Vec<String> = row.iter().map(|f| csv_field(f)).collect();
            out.push_str(&fields.join(","));
            out.push_str("\r\n");
        }

        out
    }
}

/// RFC 4180 quoting: fields containing a delimiter, quote or line break
/// are wrapped in quotes with inner quotes doubled.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[derive(Debug, Clone)]
pub struct HistoryRepository {
    store: OptionStore,
}

impl HistoryRepository {
    pub fn new(store: OptionStore) -> Self {
        Self { store }
    }

    /// Records, newest first.
    pub fn list(&self) -> Result<Vec<HistoryRecord>> {
        let mut records: Vec<HistoryRecord> = self.store.get_or_default(keys::HISTORY)?;
        records.sort_by(|a, b| b.run_at.cmp(&a.run_at));
        Ok(records)
    }

    pub fn find(&self, run_at: i64) -> Result<Option<HistoryRecord>> {
        Ok(self.list()?.into_iter().find(|r| r.run_at == run_at))
    }

    /// Stores a snapshot, replacing any record with the same `run_at`, and
    /// evicts the oldest records beyond `retention`.
    pub fn save(&self, run_at: i64, risks: &[Risk], retention: u8) -> Result<()> {
        let retention = clamp_retention(retention) as usize;

        let mut records = self.list()?;
        records.retain(|r| r.run_at != run_at);
        records.push(HistoryRecord {
            run_at,
            risks: risks.to_vec(),
        });

        records.sort_by(|a, b| a.run_at.cmp(&b.run_at));
        while records.len() > retention {
            records.remove(0);
        }
        records.reverse();

        self.store.set(keys::HISTORY, &records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RiskDetails;

    fn risk(slug: &str, reasons: &[&str]) -> Risk {
        Risk {
            plugin_slug: slug.to_string(),
            plugin_name: format!("{} plugin", slug),
            local_version: "1.0.0".to_string(),
            remote_version: Some("1.2.0".to_string()),
            reasons: reasons.iter().map(|r| r.to_string()).collect(),
            details: RiskDetails::default(),
        }
    }

    #[test]
    fn test_retention_keeps_most_recent() {
        let repo = HistoryRepository::new(OptionStore::in_memory());
        repo.save(100, &[], 2).unwrap();
        repo.save(200, &[], 2).unwrap();
        repo.save(300, &[], 2).unwrap();

        let run_ats: Vec<i64> = repo.list().unwrap().iter().map(|r| r.run_at).collect();
        assert_eq!(run_ats, vec![300, 200]);
    }

    #[test]
    fn test_same_run_at_replaces() {
        let repo = HistoryRepository::new(OptionStore::in_memory());
        repo.save(100, &[], 5).unwrap();
        repo.save(100, &[risk("a", &["x"])], 5).unwrap();

        let records = repo.list().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].risks.len(), 1);
    }

    #[test]
    fn test_out_of_order_save_evicts_oldest() {
        let repo = HistoryRepository::new(OptionStore::in_memory());
        repo.save(300, &[], 2).unwrap();
        repo.save(100, &[], 2).unwrap();
        repo.save(200, &[], 2).unwrap();

        let run_ats: Vec<i64> = repo.list().unwrap().iter().map(|r| r.run_at).collect();
        assert_eq!(run_ats, vec![300, 200]);
        assert!(repo.find(100).unwrap().is_none());
        assert!(repo.find(200).unwrap().is_some());
    }

    #[test]
    fn test_json_export() {
        let record = HistoryRecord {
            run_at: 42,
            risks: vec![risk("a", &["x"])],
        };
        let value: serde_json::Value = serde_json::from_str(&record.to_json().unwrap()).unwrap();

        assert_eq!(value["run_at"], 42);
        assert_eq!(value["risk_count"], 1);
        assert_eq!(value["risks"][0]["plugin_slug"], "a");
    }

    #[test]
    fn test_csv_export_quotes_fields() {
        let mut tricky = risk("b", &["Update available", "Changelog says \"security\""]);
        tricky.plugin_name = "Forms, Pro".to_string();
        tricky.remote_version = None;

        let record = HistoryRecord {
            run_at: 7,
            risks: vec![risk("a", &["one"]), tricky],
        };
        let csv = record.to_csv();
        let lines: Vec<&str> = csv.split("\r\n").collect();

        assert_eq!(
            lines[0],
            "run_at,plugin_slug,plugin_name,local_version,remote_version,reasons"
        );
        assert_eq!(lines[1], "7,a,a plugin,1.0.0,1.2.0,one");
        assert_eq!(
            lines[2],
            "7,b,\"Forms, Pro\",1.0.0,,\"Update available; Changelog says \"\"security\"\"\""
        );
    }
}
