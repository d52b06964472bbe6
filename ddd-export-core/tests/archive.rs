use std::io::{Cursor, Read};

use ddd_export_core::archive::{build, BuiltArchive};
use ddd_export_core::contract::ArchiveEntry;
use zip::ZipArchive;

fn reopen(bytes: &[u8]) -> Vec<(String, Vec<u8>)> {
    let mut zip = ZipArchive::new(Cursor::new(bytes)).expect("archive should reopen");
    (0..zip.len())
        .map(|i| {
            let mut entry = zip.by_index(i).expect("entry");
            let mut content = Vec::new();
            entry.read_to_end(&mut content).expect("read entry");
            (entry.name().to_string(), content)
        })
        .collect()
}

#[test]
fn empty_input_builds_valid_empty_archive() {
    let bytes = build(&[]).expect("empty archive should build");
    assert!(!bytes.is_empty(), "end-of-central-directory record expected");
    assert!(reopen(&bytes).is_empty());
}

#[test]
fn entries_round_trip_in_input_order() {
    let entries = vec![
        ArchiveEntry {
            name: "a.ddd".into(),
            content: b"X".to_vec(),
        },
        ArchiveEntry {
            name: "b.ddd".into(),
            content: b"YZ".to_vec(),
        },
    ];
    let bytes = build(&entries).expect("archive should build");
    assert_eq!(
        reopen(&bytes),
        vec![
            ("a.ddd".to_string(), b"X".to_vec()),
            ("b.ddd".to_string(), b"YZ".to_vec()),
        ]
    );
}

#[test]
fn digest_is_stable_hex() {
    let archive = BuiltArchive {
        file_name: "x.zip".into(),
        entries: vec![],
        bytes: b"abc".to_vec(),
    };
    assert_eq!(
        archive.sha256_hex(),
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
}
