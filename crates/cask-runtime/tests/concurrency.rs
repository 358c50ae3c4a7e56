//! One archive shared by many threads.

mod common;

use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Barrier};
use std::thread;

use cask_format::{BuildOptions, TocFormat, TypeCode};
use cask_runtime::{Archive, BundleImporter, FileSession, OpaqueUnits, OpenOptions};

use common::{build, noise, write};

const THREADS: usize = 8;
const ROUNDS: usize = 25;

fn fixture(dir: &Path) -> (PathBuf, Vec<(String, Vec<u8>)>) {
    let units: Vec<(String, Vec<u8>)> = (0..THREADS * 2)
        .map(|i| (format!("mods.unit{i}"), noise(i as u32 + 1, 1000 + i * 131)))
        .collect();
    let list: Vec<_> = units
        .iter()
        .map(|(name, data)| (name.as_str(), TypeCode::Module, data.as_slice(), true))
        .collect();
    let options = BuildOptions::new(TocFormat::SelfDescribing).key(b"concurrency");
    let path = write(dir, "bundle.bin", &build(options, &list));
    (path, units)
}

#[test]
fn test_concurrent_extraction_matches_sequential() {
    let dir = tempfile::tempdir().unwrap();
    let (path, units) = fixture(dir.path());
    let options = OpenOptions::new().key(b"concurrency");
    let archive = Arc::new(Archive::open_with(&path, &options).unwrap());

    let sequential: Vec<Vec<u8>> = units
        .iter()
        .map(|(name, _)| archive.extract(name).unwrap().data)
        .collect();
    for ((_, data), extracted) in units.iter().zip(&sequential) {
        assert_eq!(data, extracted);
    }

    let units = Arc::new(units);
    let start = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let archive = Arc::clone(&archive);
            let units = Arc::clone(&units);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                for round in 0..ROUNDS {
                    // Each thread walks its own pair of entries, offset by round.
                    let (name, data) = &units[(t * 2 + round % 2) % units.len()];
                    let extracted = archive.extract(name).unwrap();
                    assert_eq!(&extracted.data, data, "thread {t} round {round}");
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn test_importer_is_shared_across_threads() {
    let dir = tempfile::tempdir().unwrap();
    let (path, units) = fixture(dir.path());
    let options = OpenOptions::new().key(b"concurrency");
    let archive = Archive::open_with(&path, &options).unwrap();
    let importer = Arc::new(BundleImporter::new(Arc::new(archive), OpaqueUnits));
    let units = Arc::new(units);

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let importer = Arc::clone(&importer);
            let units = Arc::clone(&units);
            thread::spawn(move || {
                for (name, data) in units.iter().skip(t).step_by(THREADS) {
                    let unit = importer.resolve(name, None).unwrap().unwrap();
                    assert_eq!(unit.code.as_ref(), Some(data));
                    let missing = format!("{name}.missing");
                    assert!(!importer.find(&missing, None).is_found());
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn test_interleaved_sessions_rendezvous() {
    let dir = tempfile::tempdir().unwrap();
    let (path, _) = fixture(dir.path());
    let expected = std::fs::read(&path).unwrap();
    let session = Arc::new(FileSession::new(&path));

    // Two threads enter, seek to different offsets, and only then read, so
    // a shared cursor would hand at least one of them the wrong bytes.
    let rendezvous = Arc::new(Barrier::new(2));
    let offsets = [64u64, expected.len() as u64 - 200];
    let handles: Vec<_> = offsets
        .into_iter()
        .map(|offset| {
            let session = Arc::clone(&session);
            let rendezvous = Arc::clone(&rendezvous);
            thread::spawn(move || {
                let mut guard = session.enter().unwrap();
                guard.seek(SeekFrom::Start(offset)).unwrap();
                rendezvous.wait();
                let mut first = vec![0u8; 50];
                guard.read_exact(&mut first).unwrap();
                rendezvous.wait();
                let mut second = vec![0u8; 50];
                guard.read_exact(&mut second).unwrap();
                drop(guard);

                // Position carries over to this thread's next acquisition.
                assert_eq!(session.remembered_position(), offset + 100);
                let mut guard = session.enter().unwrap();
                let mut third = vec![0u8; 10];
                guard.read_exact(&mut third).unwrap();
                (offset, first, second, third)
            })
        })
        .collect();

    for handle in handles {
        let (offset, first, second, third) = handle.join().unwrap();
        let at = offset as usize;
        assert_eq!(first, expected[at..at + 50]);
        assert_eq!(second, expected[at + 50..at + 100]);
        assert_eq!(third, expected[at + 100..at + 110]);
    }
}
