//! Unit tests for the metadata writer.

use super::*;
use crate::test_support::{Call, CallLog, RemoteHost, ScriptedConnection, ScriptedDriver};
use chrono::TimeZone;
use serde_json::json;

fn machine() -> MachineRecord {
    MachineRecord::new("i-0abc", "eu-west-1 / i-0abc")
}

fn user_and_group() -> UserAndGroup {
    UserAndGroup {
        uid: String::from("1000"),
        gid: String::from("999"),
    }
}

fn metadata_at(seconds: i64, driver: &str) -> ProvisioningMetadata {
    let time = Utc
        .timestamp_opt(seconds, 0)
        .single()
        .expect("valid timestamp");
    let mut opts = Map::new();
    opts.insert(String::from("region"), json!("eu-west-1"));
    ProvisioningMetadata::new(&machine(), driver, opts, time)
}

fn read_back(host: &RemoteHost, path: &Utf8Path) -> MetadataDocument {
    let contents = host.file(path.as_str()).expect("metadata file written");
    serde_json::from_str(&contents).expect("metadata should parse")
}

#[test]
fn document_uses_camel_case_and_millisecond_timestamps() {
    let document = MetadataDocument {
        driver: metadata_at(1_714_566_600, "lightsail"),
    };

    let value = serde_json::to_value(&document).expect("serialize");

    assert_eq!(
        value,
        json!({
            "driver": {
                "creationTime": "2024-05-01T12:30:00.000Z",
                "providerId": "i-0abc",
                "machineLocationDescription": "eu-west-1 / i-0abc",
                "driver": "lightsail",
                "opts": { "region": "eu-west-1" }
            }
        })
    );
}

#[test]
fn metadata_path_joins_base_and_file_name() {
    let writer = MetadataWriter::new("/srv/state", "meta.json");
    assert_eq!(writer.metadata_path(), Utf8PathBuf::from("/srv/state/meta.json"));
}

#[tokio::test]
async fn write_prepares_directory_as_root_then_streams_document() {
    let log = CallLog::new();
    let host = RemoteHost::new();
    let connection = ScriptedConnection::new(1, host.clone(), log.clone());
    let writer = MetadataWriter::default();

    writer
        .write(&connection, &metadata_at(1_714_566_600, "lightsail"), &user_and_group())
        .await
        .expect("write should succeed");

    assert_eq!(
        log.calls(),
        vec![
            Call::Exec {
                connection: 1,
                command: String::from(
                    "mkdir -p /var/lib/hangar && chown '1000:999' /var/lib/hangar"
                ),
                as_root: true,
            },
            Call::Exec {
                connection: 1,
                command: String::from("cat > /var/lib/hangar/driver-metadata.json"),
                as_root: false,
            },
        ]
    );
    let document = read_back(&host, &writer.metadata_path());
    assert_eq!(document.driver.provider_id, "i-0abc");
}

#[tokio::test]
async fn second_write_fully_replaces_first() {
    let host = RemoteHost::new();
    let connection = ScriptedConnection::new(1, host.clone(), CallLog::new());
    let writer = MetadataWriter::default();
    let first = metadata_at(1_700_000_000, "first-driver");
    let second = metadata_at(1_714_566_600, "second-driver");

    writer
        .write(&connection, &first, &user_and_group())
        .await
        .expect("first write");
    writer
        .write(&connection, &second, &user_and_group())
        .await
        .expect("second write");

    let document = read_back(&host, &writer.metadata_path());
    assert_eq!(document.driver, second);
}

#[tokio::test]
async fn directory_failure_stops_before_writing() {
    let log = CallLog::new();
    let host = RemoteHost::new();
    host.fail_command("mkdir -p", 1);
    let connection = ScriptedConnection::new(1, host.clone(), log.clone());
    let writer = MetadataWriter::default();

    let err = writer
        .write(&connection, &metadata_at(0, "lightsail"), &user_and_group())
        .await
        .expect_err("prepare should fail");

    assert!(
        matches!(err, MetadataError::PrepareDirectory { .. }),
        "unexpected error: {err}"
    );
    assert_eq!(log.exec_commands().len(), 1);
    assert!(host.file(writer.metadata_path().as_str()).is_none());
}

#[tokio::test]
async fn file_write_failure_is_reported_with_path() {
    let host = RemoteHost::new();
    host.fail_command("cat >", 1);
    let connection = ScriptedConnection::new(1, host, CallLog::new());
    let writer = MetadataWriter::default();

    let err = writer
        .write(&connection, &metadata_at(0, "lightsail"), &user_and_group())
        .await
        .expect_err("write should fail");

    assert!(
        matches!(err, MetadataError::Write { ref path, .. } if path == &writer.metadata_path()),
        "unexpected error: {err}"
    );
}

#[tokio::test]
async fn write_for_driver_records_driver_name_and_options() {
    let mut opts = Map::new();
    opts.insert(String::from("instance-type"), json!("small"));
    let driver = ScriptedDriver::new().with_options(opts.clone());
    let connection = ScriptedConnection::new(1, driver.host(), driver.log());
    let writer = MetadataWriter::default();

    writer
        .write_for_driver(&driver, &connection, &machine(), &user_and_group())
        .await
        .expect("write should succeed");

    let document = read_back(&driver.host(), &writer.metadata_path());
    assert_eq!(document.driver.driver, driver.name());
    assert_eq!(document.driver.opts, opts);
}
