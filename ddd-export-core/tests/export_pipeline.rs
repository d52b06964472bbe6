use std::io::Cursor;
use std::time::Duration;

use chrono::NaiveDate;
use ddd_export_core::catalog::VehicleCatalog;
use ddd_export_core::contract::{
    MockNotifier, MockRemoteDirectory, MockVehicleSource, OutgoingMail, RemoteFileRecord, Vehicle,
};
use ddd_export_core::error::{ExportError, MailError, RemoteError};
use ddd_export_core::export::{
    dropped_names, Delivery, ExportOutcome, ExportPipeline, ExportSettings, FileSelection,
};

// 2025-05-14T10:00:00Z and 2025-05-13T10:00:00Z
const MAY_14: i64 = 1_747_216_800;
const MAY_13: i64 = 1_747_130_400;

fn target() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 5, 14).unwrap()
}

fn bg123() -> Vehicle {
    Vehicle {
        id: 42,
        name: "Scania R450".into(),
        registration_number: "BG-123".into(),
    }
}

fn record(name: &str, created: i64, modified: i64) -> RemoteFileRecord {
    RemoteFileRecord {
        name: name.into(),
        created: Some(created),
        modified: Some(modified),
    }
}

fn source_with(vehicles: Vec<Vehicle>) -> MockVehicleSource {
    let mut source = MockVehicleSource::new();
    source
        .expect_search_vehicles()
        .returning(move |_| Ok(vehicles.clone()));
    source
}

fn email() -> Delivery {
    Delivery::Email {
        recipients: "ops@fleet.example, audit@fleet.example".into(),
    }
}

fn all_for_date() -> FileSelection {
    FileSelection::MatchingDate {
        fallback_recent: None,
    }
}

#[tokio::test]
async fn end_to_end_selects_same_day_files_and_mails_archive() {
    let source = source_with(vec![bg123()]);
    let mut directory = MockRemoteDirectory::new();
    directory
        .expect_list_files()
        .withf(|id| *id == 42)
        .returning(|_| {
            Ok(vec![
                record("C_20250514_0800.ddd", MAY_14, MAY_14),
                record("M_BG123_a.ddd", MAY_13, MAY_14 + 120),
                record("M_BG123_old.ddd", MAY_13, MAY_13),
            ])
        });
    directory
        .expect_fetch_file()
        .times(2)
        .returning(|_, name| Ok(name.as_bytes().to_vec()));

    let mut notifier = MockNotifier::new();
    notifier
        .expect_send()
        .withf(|mail: &OutgoingMail| {
            mail.subject.contains("BG-123")
                && mail.subject.contains("14.05.2025")
                && mail.attachment_name == "BG-123_2025-05-14.zip"
                && mail.recipients.contains("ops@fleet.example")
        })
        .times(1)
        .returning(|_| Ok(()));

    let catalog = VehicleCatalog::new(&source, Duration::ZERO);
    let pipeline = ExportPipeline::new(&catalog, &directory, &notifier, ExportSettings::default());
    let outcome = pipeline
        .export_vehicle(42, target(), &all_for_date(), &email())
        .await
        .expect("export should succeed");

    let archive = match outcome {
        ExportOutcome::Sent(archive) => archive,
        other => panic!("expected Sent, got {other:?}"),
    };
    assert_eq!(archive.file_name, "BG-123_2025-05-14.zip");
    assert_eq!(archive.entries, vec!["M_BG123_a.ddd", "C_20250514_0800.ddd"]);
    let zip = zip::ZipArchive::new(Cursor::new(archive.bytes)).unwrap();
    assert_eq!(zip.len(), 2);
}

#[tokio::test]
async fn failed_download_aborts_without_notifying() {
    let source = source_with(vec![bg123()]);
    let mut directory = MockRemoteDirectory::new();
    directory.expect_list_files().returning(|_| {
        Ok(vec![
            record("one.ddd", MAY_14, MAY_14 + 30),
            record("two.ddd", MAY_14, MAY_14 + 20),
            record("three.ddd", MAY_14, MAY_14 + 10),
        ])
    });
    directory.expect_fetch_file().returning(|_, name| {
        if name == "two.ddd" {
            Err(RemoteError::Transport("connection reset".into()))
        } else {
            Ok(vec![1, 2, 3])
        }
    });
    let mut notifier = MockNotifier::new();
    notifier.expect_send().never();

    let catalog = VehicleCatalog::new(&source, Duration::ZERO);
    let pipeline = ExportPipeline::new(&catalog, &directory, &notifier, ExportSettings::default());
    let err = pipeline
        .export_vehicle(42, target(), &all_for_date(), &email())
        .await
        .unwrap_err();

    match err {
        ExportError::Download { file, source } => {
            assert_eq!(file, "two.ddd");
            assert_eq!(source, RemoteError::Transport("connection reset".into()));
        }
        other => panic!("expected download failure, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_folder_ends_with_no_files() {
    let source = source_with(vec![bg123()]);
    let mut directory = MockRemoteDirectory::new();
    directory
        .expect_list_files()
        .returning(|_| Err(RemoteError::FolderNotFound));
    directory.expect_fetch_file().never();
    let mut notifier = MockNotifier::new();
    notifier.expect_send().never();

    let catalog = VehicleCatalog::new(&source, Duration::ZERO);
    let pipeline = ExportPipeline::new(&catalog, &directory, &notifier, ExportSettings::default());
    let outcome = pipeline
        .export_vehicle(42, target(), &all_for_date(), &email())
        .await
        .unwrap();
    assert!(matches!(outcome, ExportOutcome::NoFiles));
}

#[tokio::test]
async fn other_listing_errors_abort_the_vehicle() {
    let source = source_with(vec![bg123()]);
    let mut directory = MockRemoteDirectory::new();
    directory.expect_list_files().returning(|_| {
        Err(RemoteError::Api {
            code: 1,
            message: "invalid session".into(),
        })
    });
    let notifier = MockNotifier::new();

    let catalog = VehicleCatalog::new(&source, Duration::ZERO);
    let pipeline = ExportPipeline::new(&catalog, &directory, &notifier, ExportSettings::default());
    let err = pipeline
        .export_vehicle(42, target(), &all_for_date(), &Delivery::LocalDownload)
        .await
        .unwrap_err();
    assert!(matches!(err, ExportError::ListFiles(RemoteError::Api { code: 1, .. })));
}

#[tokio::test]
async fn mail_failure_keeps_the_archive() {
    let source = source_with(vec![bg123()]);
    let mut directory = MockRemoteDirectory::new();
    directory
        .expect_list_files()
        .returning(|_| Ok(vec![record("a.ddd", MAY_14, MAY_14)]));
    directory
        .expect_fetch_file()
        .returning(|_, _| Ok(b"payload".to_vec()));
    let mut notifier = MockNotifier::new();
    notifier
        .expect_send()
        .returning(|_| Err(MailError::Auth("535 bad credentials".into())));

    let catalog = VehicleCatalog::new(&source, Duration::ZERO);
    let pipeline = ExportPipeline::new(&catalog, &directory, &notifier, ExportSettings::default());
    let outcome = pipeline
        .export_vehicle(42, target(), &all_for_date(), &email())
        .await
        .unwrap();

    match outcome {
        ExportOutcome::MailFailed { archive, error } => {
            assert_eq!(archive.entries, vec!["a.ddd"]);
            assert!(matches!(error, MailError::Auth(_)));
        }
        other => panic!("expected MailFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn local_download_never_touches_the_notifier() {
    let source = source_with(vec![bg123()]);
    let mut directory = MockRemoteDirectory::new();
    directory.expect_list_files().returning(|_| {
        Ok(vec![
            record("a.ddd", MAY_14, MAY_14),
            record("b.ddd", MAY_14, MAY_14),
        ])
    });
    directory
        .expect_fetch_file()
        .times(1)
        .returning(|_, _| Ok(b"payload".to_vec()));
    let mut notifier = MockNotifier::new();
    notifier.expect_send().never();

    let catalog = VehicleCatalog::new(&source, Duration::ZERO);
    let pipeline = ExportPipeline::new(&catalog, &directory, &notifier, ExportSettings::default());
    let selection = FileSelection::Named(vec!["b.ddd".into(), "not-listed.ddd".into()]);
    let outcome = pipeline
        .export_vehicle(42, target(), &selection, &Delivery::LocalDownload)
        .await
        .unwrap();

    match outcome {
        ExportOutcome::Ready(archive) => assert_eq!(archive.entries, vec!["b.ddd"]),
        other => panic!("expected Ready, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_vehicle_is_reported() {
    let source = source_with(vec![bg123()]);
    let directory = MockRemoteDirectory::new();
    let notifier = MockNotifier::new();

    let catalog = VehicleCatalog::new(&source, Duration::ZERO);
    let pipeline = ExportPipeline::new(&catalog, &directory, &notifier, ExportSettings::default());
    let err = pipeline
        .export_vehicle(7, target(), &all_for_date(), &Delivery::LocalDownload)
        .await
        .unwrap_err();
    assert!(matches!(err, ExportError::VehicleNotFound(7)));
}

#[tokio::test]
async fn export_all_continues_after_a_failed_vehicle() {
    let fleet = vec![
        Vehicle {
            id: 1,
            name: "First".into(),
            registration_number: "AA-1".into(),
        },
        Vehicle {
            id: 2,
            name: "Second".into(),
            registration_number: "BB-2".into(),
        },
        Vehicle {
            id: 3,
            name: "Third".into(),
            registration_number: "CC-3".into(),
        },
    ];
    let source = source_with(fleet);
    let mut directory = MockRemoteDirectory::new();
    directory.expect_list_files().returning(|id| match id {
        1 => Err(RemoteError::Transport("timeout".into())),
        2 => Ok(vec![record("x.ddd", MAY_14, MAY_14)]),
        _ => Ok(vec![record("y.ddd", MAY_13, MAY_13)]),
    });
    directory
        .expect_fetch_file()
        .returning(|_, _| Ok(b"data".to_vec()));
    let mut notifier = MockNotifier::new();
    notifier
        .expect_send()
        .withf(|mail: &OutgoingMail| mail.attachment_name == "BB-2_2025-05-14.zip")
        .times(1)
        .returning(|_| Ok(()));

    let catalog = VehicleCatalog::new(&source, Duration::ZERO);
    let pipeline = ExportPipeline::new(&catalog, &directory, &notifier, ExportSettings::default());
    let report = pipeline
        .export_all(target(), &all_for_date(), &email())
        .await
        .expect("catalog listing should succeed");

    let states: Vec<_> = report.vehicles.iter().map(|v| (v.vehicle.id, v.state())).collect();
    assert_eq!(states, vec![(1, "failed"), (2, "sent"), (3, "no-files")]);
    assert_eq!(report.failures(), 1);
}

#[tokio::test]
async fn fallback_recent_ships_newest_files_when_nothing_matches() {
    let source = source_with(vec![bg123()]);
    let mut directory = MockRemoteDirectory::new();
    directory.expect_list_files().returning(|_| {
        Ok(vec![
            record("old.ddd", MAY_13 - 500, MAY_13 - 500),
            record("newer.ddd", MAY_13, MAY_13),
            record("oldest.ddd", MAY_13 - 900, MAY_13 - 900),
        ])
    });
    directory
        .expect_fetch_file()
        .times(2)
        .returning(|_, _| Ok(b"data".to_vec()));
    let notifier = MockNotifier::new();

    let catalog = VehicleCatalog::new(&source, Duration::ZERO);
    let pipeline = ExportPipeline::new(&catalog, &directory, &notifier, ExportSettings::default());
    let selection = FileSelection::MatchingDate {
        fallback_recent: Some(2),
    };
    let outcome = pipeline
        .export_vehicle(42, target(), &selection, &Delivery::LocalDownload)
        .await
        .unwrap();
    assert_eq!(
        outcome.archive().map(|a| a.entries.clone()),
        Some(vec!["newer.ddd".to_string(), "old.ddd".to_string()])
    );
}

#[tokio::test]
async fn named_files_off_date_or_unlisted_end_as_no_files() {
    let source = source_with(vec![bg123()]);
    let mut directory = MockRemoteDirectory::new();
    directory
        .expect_list_files()
        .returning(|_| Ok(vec![record("old.ddd", MAY_13, MAY_13)]));
    directory.expect_fetch_file().never();
    let mut notifier = MockNotifier::new();
    notifier.expect_send().never();

    let catalog = VehicleCatalog::new(&source, Duration::ZERO);
    let pipeline = ExportPipeline::new(&catalog, &directory, &notifier, ExportSettings::default());
    let selection = FileSelection::Named(vec!["old.ddd".into(), "ghost.ddd".into()]);
    let outcome = pipeline
        .export_vehicle(42, target(), &selection, &Delivery::LocalDownload)
        .await
        .unwrap();

    assert!(matches!(outcome, ExportOutcome::NoFiles));
}

#[test]
fn dropped_names_lists_requests_that_were_not_kept() {
    let requested = vec!["a.ddd".to_string(), "ghost.ddd".to_string(), "old.ddd".to_string()];
    let kept = vec![record("a.ddd", MAY_14, MAY_14)];
    assert_eq!(dropped_names(&requested, &kept), vec!["ghost.ddd", "old.ddd"]);
}
