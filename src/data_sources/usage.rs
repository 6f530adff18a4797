//! `hpegl_metal_usage`: host and volume usage over a reporting window.

use chrono::{DateTime, Datelike, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::filter::{self, filter_block, FilterSet, FILTER};
use super::{with_outputs, DataSource};
use crate::client::MetalClient;
use crate::error::{ProviderError, ResultExt};
use crate::resources::decode;
use crate::schema::{Attribute, AttributeType, Diagnostic, Schema};

pub const TYPE_NAME: &str = "hpegl_metal_usage";

const FILTER_FIELDS: &[&str] = &["name", "project_id", "location_id"];

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UsageConfig {
    start: String,
    end: String,
}

impl UsageConfig {
    fn window(&self) -> Result<(DateTime<Utc>, Option<DateTime<Utc>>), ProviderError> {
        let start = parse_time("start", &self.start)?;
        let end = match self.end.as_str() {
            "" => None,
            end => Some(parse_time("end", end)?),
        };
        Ok((start, end))
    }
}

fn parse_time(attribute: &str, value: &str) -> Result<DateTime<Utc>, ProviderError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            ProviderError::Validation(format!(
                "{:?} must be an RFC 3339 timestamp, got {:?}: {}",
                attribute, value, e
            ))
        })
}

/// Unset, or the zero time some portals send instead of null.
fn is_zero(t: Option<DateTime<Utc>>) -> bool {
    t.map_or(true, |t| t.year() <= 1)
}

fn render(t: Option<DateTime<Utc>>) -> String {
    t.map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true)).unwrap_or_default()
}

/// Timestamps common to host and volume records.
struct Period {
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    allocated: Option<DateTime<Utc>>,
    freed: Option<DateTime<Utc>>,
    ready: Option<DateTime<Utc>>,
}

impl Period {
    fn fields(&self) -> Value {
        let allocated = render(self.allocated);
        let freed = if is_zero(self.freed) { String::new() } else { render(self.freed) };
        let ready = if is_zero(self.ready) { allocated.clone() } else { render(self.ready) };
        json!({
            "start": render(self.start),
            "end": render(self.end),
            "allocated": allocated,
            "freed": freed,
            "ready": ready,
        })
    }
}

fn merge(mut base: Value, extra: Value) -> Value {
    if let (Value::Object(base), Value::Object(extra)) = (&mut base, extra) {
        base.extend(extra);
    }
    base
}

fn usage_fields(extra: &[(&'static str, AttributeType)]) -> Attribute {
    let mut fields = vec![
        ("id", AttributeType::String),
        ("name", AttributeType::String),
        ("usage_hours", AttributeType::Int64),
        ("project_id", AttributeType::String),
        ("location_id", AttributeType::String),
        ("start", AttributeType::String),
        ("end", AttributeType::String),
        ("allocated", AttributeType::String),
        ("freed", AttributeType::String),
        ("ready", AttributeType::String),
        ("error", AttributeType::String),
    ];
    fields.extend(extra.iter().cloned());
    Attribute::computed(AttributeType::object_list(fields))
}

/// `hpegl_metal_usage` handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct UsageSource;

#[async_trait::async_trait]
impl DataSource for UsageSource {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("Host and volume usage for the current project.")
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "start",
                Attribute::required_string()
                    .with_description("Start of the reporting window (RFC 3339)."),
            )
            .with_attribute(
                "end",
                Attribute::optional_string()
                    .with_description("End of the reporting window; defaults to now."),
            )
            .with_attribute(
                "host_usage",
                usage_fields(&[
                    ("machine_size", AttributeType::String),
                    ("machine_size_id", AttributeType::String),
                ]),
            )
            .with_attribute(
                "volume_usage",
                usage_fields(&[
                    ("flavor", AttributeType::String),
                    ("flavor_id", AttributeType::String),
                    ("capacity", AttributeType::Int64),
                ]),
            )
            .with_block(FILTER, filter_block())
    }

    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        let mut diagnostics = filter::diagnostics(config, FILTER_FIELDS);
        for attribute in ["start", "end"] {
            if let Some(value) = config.get(attribute).and_then(Value::as_str) {
                if !value.is_empty() {
                    if let Err(e) = parse_time(attribute, value) {
                        diagnostics.push(Diagnostic::error(e.message()).with_attribute(attribute));
                    }
                }
            }
        }
        diagnostics
    }

    async fn read(&self, client: &MetalClient, config: &Value) -> Result<Value, ProviderError> {
        let cfg: UsageConfig = decode(config)?;
        let filters = FilterSet::from_config(config)?;
        let (start, end) = cfg.window()?;

        let report = client.api.usage_report(start, end).await.during("read usage")?;
        debug!(hosts = report.hosts.len(), volumes = report.volumes.len(), "Fetched usage report");

        let hosts: Vec<Value> = report
            .hosts
            .iter()
            .filter(|u| {
                filters.matches(&[
                    ("name", u.host_name.as_str()),
                    ("project_id", u.project_id.as_str()),
                    ("location_id", u.location_id.as_str()),
                ])
            })
            .map(|u| {
                let period = Period {
                    start: u.usage_start,
                    end: u.usage_end,
                    allocated: u.allocated,
                    freed: u.freed,
                    ready: u.ready,
                };
                merge(
                    json!({
                        "id": u.host_id,
                        "name": u.host_name,
                        "machine_size": u.machine_size_name,
                        "machine_size_id": u.machine_size_id,
                        "usage_hours": u.usage_hours,
                        "project_id": u.project_id,
                        "location_id": u.location_id,
                        "error": u.error,
                    }),
                    period.fields(),
                )
            })
            .collect();

        let volumes: Vec<Value> = report
            .volumes
            .iter()
            .filter(|u| {
                filters.matches(&[
                    ("name", u.volume_name.as_str()),
                    ("project_id", u.project_id.as_str()),
                    ("location_id", u.location_id.as_str()),
                ])
            })
            .map(|u| {
                let period = Period {
                    start: u.usage_start,
                    end: u.usage_end,
                    allocated: u.allocated,
                    freed: u.freed,
                    ready: u.ready,
                };
                merge(
                    json!({
                        "id": u.volume_id,
                        "name": u.volume_name,
                        "flavor": u.flavor_name,
                        "flavor_id": u.flavor_id,
                        "capacity": u.capacity,
                        "usage_hours": u.usage_hours,
                        "project_id": u.project_id,
                        "location_id": u.location_id,
                        "error": u.error,
                    }),
                    period.fields(),
                )
            })
            .collect();

        Ok(with_outputs(
            config,
            json!({ "id": "usage", "host_usage": hosts, "volume_usage": volumes }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tests::sample;
    use crate::client::models::{HostUsage, VolumeUsage};
    use crate::testing::FakeMetal;
    use chrono::TimeZone;

    fn at(day: u32) -> Option<DateTime<Utc>> {
        Some(Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap())
    }

    fn fake_with_usage() -> std::sync::Arc<FakeMetal> {
        let fake = FakeMetal::new(sample());
        {
            let mut st = fake.state();
            st.usage.hosts = vec![
                HostUsage {
                    host_id: "host-1".into(),
                    host_name: "web-1".into(),
                    machine_size_name: "Small".into(),
                    project_id: "proj-a".into(),
                    location_id: "loc-1".into(),
                    usage_hours: 48,
                    allocated: at(1),
                    ready: at(2),
                    freed: at(3),
                    ..Default::default()
                },
                HostUsage {
                    host_id: "host-2".into(),
                    host_name: "db-1".into(),
                    project_id: "proj-b".into(),
                    allocated: at(5),
                    ..Default::default()
                },
            ];
            st.usage.volumes = vec![VolumeUsage {
                volume_id: "vol-1".into(),
                volume_name: "data".into(),
                flavor_name: "Fast".into(),
                capacity: 100,
                project_id: "proj-a".into(),
                allocated: at(4),
                ready: Some(Utc.with_ymd_and_hms(1, 1, 1, 0, 0, 0).unwrap()),
                ..Default::default()
            }];
        }
        fake
    }

    #[tokio::test]
    async fn test_reports_window_and_patches_zero_times() {
        let fake = fake_with_usage();
        let client = fake.client(10);

        let state = UsageSource
            .read(&client, &json!({"start": "2024-03-01T00:00:00Z"}))
            .await
            .unwrap();
        assert_eq!(state["id"], "usage");
        assert_eq!(state["start"], "2024-03-01T00:00:00Z");

        let hosts = state["host_usage"].as_array().unwrap();
        assert_eq!(hosts.len(), 2);
        assert_eq!(hosts[0]["freed"], "2024-03-03T12:00:00Z");
        assert_eq!(hosts[0]["ready"], "2024-03-02T12:00:00Z");
        assert_eq!(hosts[0]["usage_hours"], 48);
        assert_eq!(hosts[1]["freed"], "");
        assert_eq!(hosts[1]["ready"], "2024-03-05T12:00:00Z");

        let volume = &state["volume_usage"][0];
        assert_eq!(volume["flavor"], "Fast");
        assert_eq!(volume["ready"], volume["allocated"]);

        let (start, end) = fake.state().last_usage_query.unwrap();
        assert_eq!(start.to_rfc3339(), "2024-03-01T00:00:00+00:00");
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn test_filters_by_project() {
        let client = fake_with_usage().client(10);
        let config = json!({
            "start": "2024-03-01T00:00:00Z",
            "end": "2024-04-01T00:00:00+02:00",
            "filter": [{"name": "project_id", "values": ["^proj-b$"]}],
        });

        let state = UsageSource.read(&client, &config).await.unwrap();
        assert_eq!(state["host_usage"].as_array().unwrap().len(), 1);
        assert_eq!(state["host_usage"][0]["name"], "db-1");
        assert!(state["volume_usage"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bad_start_is_rejected() {
        let client = fake_with_usage().client(10);
        let err = UsageSource.read(&client, &json!({"start": "yesterday"})).await.unwrap_err();
        assert!(matches!(err, ProviderError::Validation(_)));

        let diags =
            UsageSource.validate(&json!({"start": "2024-03-01", "end": "2024-03-02T00:00:00Z"}));
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].attribute.as_deref(), Some("start"));
    }
}
