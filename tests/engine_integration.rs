//! End-to-end tests through the public `Engine` surface: pack files on
//! disk, search-path shadowing, and loads into every allocator.

use bedrock::{Engine, EngineConfig, EngineError, LoadDest};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Serialize a pack image: 12-byte header, member data, trailing
/// directory of 64-byte entries.
fn build_pack(members: &[(&str, &[u8])]) -> Vec<u8> {
    let mut data = Vec::new();
    let mut directory = Vec::new();
    let mut position = 12usize;

    for (name, bytes) in members {
        data.extend_from_slice(bytes);
        let mut entry = [0u8; 64];
        entry[..name.len()].copy_from_slice(name.as_bytes());
        entry[56..60].copy_from_slice(&(position as u32).to_le_bytes());
        entry[60..64].copy_from_slice(&(bytes.len() as u32).to_le_bytes());
        directory.extend_from_slice(&entry);
        position += bytes.len();
    }

    let mut image = Vec::new();
    image.extend_from_slice(b"PACK");
    image.extend_from_slice(&((12 + data.len()) as u32).to_le_bytes());
    image.extend_from_slice(&(directory.len() as u32).to_le_bytes());
    image.extend_from_slice(&data);
    image.extend_from_slice(&directory);
    image
}

fn write_pack(dir: &Path, index: usize, members: &[(&str, &[u8])]) {
    fs::write(dir.join(format!("pak{}.pak", index)), build_pack(members)).unwrap();
}

fn small_engine() -> Engine {
    let config = EngineConfig {
        hunk_size: 1024 * 1024,
        zone_size: 128 * 1024,
        ..EngineConfig::default()
    };
    Engine::init(&config).unwrap()
}

#[test]
fn test_load_from_pack_with_terminator() {
    let dir = TempDir::new().unwrap();
    write_pack(dir.path(), 0, &[("a.txt", b"hello"), ("b.txt", b"bye")]);

    let mut engine = small_engine();
    engine.add_game_directory(dir.path()).unwrap();

    let asset = engine.load("a.txt", LoadDest::HunkLow).unwrap().unwrap();
    assert_eq!(engine.bytes(asset, 6), b"hello\0");

    let asset = engine.load("b.txt", LoadDest::HunkLow).unwrap().unwrap();
    assert_eq!(engine.bytes(asset, 4), b"bye\0");

    engine.memory.validate().unwrap();
}

#[test]
fn test_directory_registration_order_wins() {
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();
    write_pack(dir_a.path(), 0, &[("shared.dat", b"AAAA")]);
    write_pack(dir_b.path(), 0, &[("shared.dat", b"BBBB")]);

    let mut engine = small_engine();
    engine.add_game_directory(dir_a.path()).unwrap();
    engine.add_game_directory(dir_b.path()).unwrap();

    let asset = engine.load("shared.dat", LoadDest::HunkLow).unwrap().unwrap();
    assert_eq!(engine.bytes(asset, 4), b"BBBB");
}

#[test]
fn test_pack_scan_stops_at_first_gap() {
    let dir = TempDir::new().unwrap();
    write_pack(dir.path(), 0, &[("zero.dat", b"0")]);
    // no pak1.pak
    write_pack(dir.path(), 2, &[("two.dat", b"2")]);

    let mut engine = small_engine();
    engine.add_game_directory(dir.path()).unwrap();

    assert!(engine.load("zero.dat", LoadDest::HunkLow).unwrap().is_some());
    // pak2 sits past the gap and is never registered as a pack, but the
    // directory node still resolves nothing for its member name
    assert!(engine.load("two.dat", LoadDest::HunkLow).unwrap().is_none());
}

#[test]
fn test_load_into_every_destination() {
    let dir = TempDir::new().unwrap();
    write_pack(
        dir.path(),
        0,
        &[("asset.bin", b"payload bytes here")],
    );

    let mut engine = small_engine();
    engine.add_game_directory(dir.path()).unwrap();

    let low = engine.load("asset.bin", LoadDest::HunkLow).unwrap().unwrap();
    let temp = engine.load("asset.bin", LoadDest::HunkTemp).unwrap().unwrap();
    let zone = engine.load("asset.bin", LoadDest::Zone).unwrap().unwrap();
    let user = engine.memory.cache_new_user();
    let cached = engine
        .load("asset.bin", LoadDest::Cache(user))
        .unwrap()
        .unwrap();
    let staged = engine.load("asset.bin", LoadDest::TempStack).unwrap().unwrap();

    for offset in [low, zone, cached, staged] {
        assert_eq!(engine.bytes(offset, 19), b"payload bytes here\0");
    }
    // the TempStack load replaced the HunkTemp one
    assert_ne!(staged, 0);
    let _ = temp;

    assert_eq!(engine.memory.cache_check(user), Some(cached));
    engine.memory.validate().unwrap();
}

#[test]
fn test_corrupt_pack_fails_initialization() {
    let dir = TempDir::new().unwrap();
    let mut image = build_pack(&[("a.txt", b"hello")]);
    image[0..4].copy_from_slice(b"QUAK");
    fs::write(dir.path().join("pak0.pak"), image).unwrap();

    let mut engine = small_engine();
    let result = engine.add_game_directory(dir.path());
    assert!(matches!(result, Err(EngineError::InvalidMagic(_))));
}

#[test]
fn test_level_rollback_releases_loaded_assets() {
    let dir = TempDir::new().unwrap();
    write_pack(dir.path(), 0, &[("level.dat", b"level geometry")]);

    let mut engine = small_engine();
    engine.add_game_directory(dir.path()).unwrap();

    let mark = engine.memory.hunk().low_mark();
    engine.load("level.dat", LoadDest::HunkLow).unwrap().unwrap();
    assert!(engine.memory.hunk().low_used() > mark);

    engine.memory.hunk_mut().free_to_low_mark(mark).unwrap();
    assert_eq!(engine.memory.hunk().low_used(), mark);

    // the next level load lands in the reclaimed space
    let again = engine.load("level.dat", LoadDest::HunkLow).unwrap().unwrap();
    assert_eq!(engine.bytes(again, 15), b"level geometry\0");
}

#[test]
fn test_cvars_and_loader_share_the_zone() {
    let dir = TempDir::new().unwrap();
    write_pack(dir.path(), 0, &[("notes.txt", b"zone resident")]);

    let mut engine = small_engine();
    engine.add_game_directory(dir.path()).unwrap();

    let id = engine.cvar_set("skill", 3.0).unwrap();
    let asset = engine.load("notes.txt", LoadDest::Zone).unwrap().unwrap();

    assert_eq!(engine.cvar_value(id), 3.0);
    assert_eq!(engine.bytes(asset, 14), b"zone resident\0");
    engine.memory.zone_check().unwrap();
}

#[test]
fn test_flush_all_clears_cached_assets() {
    let dir = TempDir::new().unwrap();
    write_pack(dir.path(), 0, &[("a.bin", b"aaaa"), ("b.bin", b"bbbb")]);

    let mut engine = small_engine();
    engine.add_game_directory(dir.path()).unwrap();

    let u1 = engine.memory.cache_new_user();
    let u2 = engine.memory.cache_new_user();
    engine.load("a.bin", LoadDest::Cache(u1)).unwrap().unwrap();
    engine.load("b.bin", LoadDest::Cache(u2)).unwrap().unwrap();

    engine.memory.cache_flush_all();
    assert_eq!(engine.memory.cache_check(u1), None);
    assert_eq!(engine.memory.cache_check(u2), None);
    engine.memory.validate().unwrap();
}
