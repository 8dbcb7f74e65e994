use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::mpsc;

use icepack::bundle::read_framing;
use icepack::{
    list, pack, unpack, Bundle, CancelToken, CipherSettings, CompressKind, EncryptKind, Error,
    FileMeta, PackOptions, Reporter, Transform, UnpackOptions, FOOTER_SIZE, HEADER_SIZE,
};
use tempfile::TempDir;

fn write(root: &Path, rel: &str, content: &[u8]) {
    let p = root.join(rel);
    fs::create_dir_all(p.parent().unwrap()).unwrap();
    fs::write(p, content).unwrap();
}

fn plain() -> PackOptions {
    PackOptions::default()
}

fn secret(compression: CompressKind) -> PackOptions {
    PackOptions {
        compression,
        encryption: EncryptKind::Aes,
        cipher: CipherSettings::new("s3cret"),
        ..Default::default()
    }
}

fn open(pack_file: &Path, cipher: &CipherSettings) -> Bundle<fs::File> {
    Bundle::open_file(pack_file, cipher.derive_key()).unwrap()
}

#[test]
fn test_two_files_offsets_and_size() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("src");
    write(&src, "a.txt", b"hello");
    write(&src, "b.txt", b"second content");
    let target = tmp.path().join("out.pack");

    let res = pack::pack(&src, &target, &plain(), &Reporter::silent()).unwrap();
    assert_eq!(res.file_count, 2);
    assert_eq!(res.dup_count, 0);
    assert_eq!(res.byte_size, fs::metadata(&target).unwrap().len());

    let fat = list::list(&target, &CipherSettings::default()).unwrap();
    assert_eq!(fat.count, 2);
    assert_eq!(fat.size, 19);
    assert_eq!(fat.items[0].path, "a.txt");
    assert_eq!((fat.items[0].offset, fat.items[0].size), (0, 5));
    assert_eq!(fat.items[1].path, "b.txt");
    assert_eq!((fat.items[1].offset, fat.items[1].size), (5, 14));
}

#[test]
fn test_pack_unpack_roundtrip_nested() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("src");
    write(&src, "top.txt", b"top level");
    write(&src, "dir1/inner.bin", &[0u8, 1, 2, 3, 255]);
    write(&src, "dir1/dir2/deep.txt", b"deep file");
    write(&src, "empty.txt", b"");
    let target = tmp.path().join("out.pack");
    let dest = tmp.path().join("dest");

    pack::pack(&src, &target, &secret(CompressKind::Gzip), &Reporter::silent()).unwrap();
    let opts = UnpackOptions { cipher: CipherSettings::new("s3cret"), ..Default::default() };
    let res = unpack::unpack(&target, &dest, &opts, &Reporter::silent()).unwrap();

    assert_eq!(res.file_count, 4);
    assert_eq!(res.byte_size, 9 + 5 + 9);
    assert_eq!(fs::read(dest.join("top.txt")).unwrap(), b"top level");
    assert_eq!(fs::read(dest.join("dir1/inner.bin")).unwrap(), [0u8, 1, 2, 3, 255]);
    assert_eq!(fs::read(dest.join("dir1/dir2/deep.txt")).unwrap(), b"deep file");
    assert_eq!(fs::read(dest.join("empty.txt")).unwrap(), b"");
}

#[cfg(unix)]
#[test]
fn test_unpack_restores_permissions_and_mtime() {
    use std::os::unix::fs::PermissionsExt;
    use std::time::{Duration, UNIX_EPOCH};

    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("src");
    write(&src, "run.sh", b"#!/bin/sh\n");
    let script = src.join("run.sh");
    fs::set_permissions(&script, fs::Permissions::from_mode(0o750)).unwrap();
    let when = UNIX_EPOCH + Duration::from_secs(1_600_000_000);
    fs::File::options().write(true).open(&script).unwrap().set_modified(when).unwrap();

    let target = tmp.path().join("out.pack");
    let dest = tmp.path().join("dest");
    pack::pack(&src, &target, &plain(), &Reporter::silent()).unwrap();

    let fat = list::list(&target, &CipherSettings::default()).unwrap();
    assert_eq!(fat.items[0].perm, 0o750);

    unpack::unpack(&target, &dest, &UnpackOptions::default(), &Reporter::silent()).unwrap();
    let md = fs::metadata(dest.join("run.sh")).unwrap();
    assert_eq!(md.permissions().mode() & 0o777, 0o750);
    assert_eq!(md.modified().unwrap(), when);
}

#[test]
fn test_dedup_identical_content() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("src");
    let content = b"the same bytes in two places";
    write(&src, "one.txt", content);
    write(&src, "sub/two.txt", content);
    let target = tmp.path().join("out.pack");

    let res = pack::pack(&src, &target, &secret(CompressKind::Zstd), &Reporter::silent()).unwrap();
    assert_eq!(res.file_count, 2);
    assert_eq!(res.dup_count, 1);

    let fat = list::list(&target, &CipherSettings::new("s3cret")).unwrap();
    let one = fat.find("one.txt").unwrap();
    let two = fat.find("sub/two.txt").unwrap();
    assert_eq!((one.offset, one.size), (two.offset, two.size));
    assert_eq!(res.dup_size, one.size as u64);
    assert_eq!(fat.size, one.size);

    let mut bundle = open(&target, &CipherSettings::new("s3cret"));
    assert_eq!(bundle.read_file("sub/two.txt").unwrap(), content);
}

#[test]
fn test_same_size_different_content_is_stored_twice() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("src");
    write(&src, "a.txt", b"aaaa");
    write(&src, "b.txt", b"bbbb");
    let target = tmp.path().join("out.pack");

    let res = pack::pack(&src, &target, &plain(), &Reporter::silent()).unwrap();
    assert_eq!(res.dup_count, 0);
    let fat = list::list(&target, &CipherSettings::default()).unwrap();
    assert_eq!(fat.size, 8);
    assert_ne!(fat.items[0].offset, fat.items[1].offset);
}

#[test]
fn test_every_transform_combination_roundtrips() {
    let body: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
    for compression in [CompressKind::None, CompressKind::Gzip, CompressKind::Zstd] {
        for encryption in [EncryptKind::None, EncryptKind::Aes] {
            let tmp = TempDir::new().unwrap();
            let src = tmp.path().join("src");
            write(&src, "data.bin", &body);
            write(&src, "note.txt", b"note");
            let target = tmp.path().join("out.pack");
            let cipher = CipherSettings::new("pw");
            let opts = PackOptions { compression, encryption, cipher: cipher.clone(), ..Default::default() };

            pack::pack(&src, &target, &opts, &Reporter::silent()).unwrap();

            let framing = read_framing(&mut fs::File::open(&target).unwrap()).unwrap();
            assert_eq!(framing.header.compress, compression);
            assert_eq!(framing.header.encrypt, encryption);

            let mut bundle = open(&target, &cipher);
            assert_eq!(bundle.read_file("data.bin").unwrap(), body, "{compression:?}/{encryption:?}");
            assert_eq!(bundle.read_file("note.txt").unwrap(), b"note");
        }
    }
}

#[test]
fn test_container_after_prefix_bytes() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("src");
    write(&src, "a.txt", b"payload");
    let packed = tmp.path().join("plain.pack");
    pack::pack(&src, &packed, &secret(CompressKind::Gzip), &Reporter::silent()).unwrap();

    let stub = vec![0x7fu8; 1000];
    let joined = tmp.path().join("stub.bin");
    let mut out = fs::File::create(&joined).unwrap();
    out.write_all(&stub).unwrap();
    out.write_all(&fs::read(&packed).unwrap()).unwrap();
    drop(out);

    let mut bundle = open(&joined, &CipherSettings::new("s3cret"));
    assert_eq!(bundle.path(), Some(joined.as_path()));
    assert_eq!(bundle.transform().compression, CompressKind::Gzip);
    assert_eq!(bundle.transform().encryption, EncryptKind::Aes);
    assert_eq!(bundle.container_start(), 1000);
    assert_eq!(bundle.data_base_offset(), 1000 + HEADER_SIZE as u64);
    assert_eq!(bundle.read_file("a.txt").unwrap(), b"payload");
}

#[test]
fn test_empty_source_directory() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("src");
    fs::create_dir_all(&src).unwrap();
    let target = tmp.path().join("out.pack");

    let res = pack::pack(&src, &target, &plain(), &Reporter::silent()).unwrap();
    assert_eq!(res.file_count, 0);

    let mut file = fs::File::open(&target).unwrap();
    let framing = read_framing(&mut file).unwrap();
    assert!(framing.header.fat_size > 0);
    assert_eq!(
        framing.footer.pack_size,
        (HEADER_SIZE + FOOTER_SIZE) as i64 + framing.header.fat_size
    );

    let fat = list::list(&target, &CipherSettings::default()).unwrap();
    assert_eq!(fat.count, 0);
    assert_eq!(fat.size, 0);
    assert!(fat.items.is_empty());
}

#[test]
fn test_single_file_source_uses_base_name() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "alone/readme.md", b"# readme");
    let target = tmp.path().join("out.pack");

    pack::pack(&tmp.path().join("alone/readme.md"), &target, &plain(), &Reporter::silent()).unwrap();
    let fat = list::list(&target, &CipherSettings::default()).unwrap();
    assert_eq!(fat.count, 1);
    assert_eq!(fat.items[0].path, "readme.md");
}

#[test]
fn test_include_exclude_filters() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("src");
    write(&src, "keep.txt", b"1");
    write(&src, "skip.log", b"2");
    write(&src, "cache/also.txt", b"3");
    let target = tmp.path().join("out.pack");

    let opts = PackOptions {
        include: Some(r"\.txt$".into()),
        exclude: Some("cache".into()),
        ..Default::default()
    };
    pack::pack(&src, &target, &opts, &Reporter::silent()).unwrap();
    let fat = list::list(&target, &CipherSettings::default()).unwrap();
    let paths: Vec<&str> = fat.items.iter().map(|i| i.path.as_str()).collect();
    assert_eq!(paths, vec!["keep.txt"]);

    // unpack applies its own filter to stored paths
    let all = tmp.path().join("all.pack");
    pack::pack(&src, &all, &plain(), &Reporter::silent()).unwrap();
    let dest = tmp.path().join("dest");
    let uopts = UnpackOptions { exclude: Some(r"\.log$".into()), ..Default::default() };
    let res = unpack::unpack(&all, &dest, &uopts, &Reporter::silent()).unwrap();
    assert_eq!(res.file_count, 2);
    assert!(!dest.join("skip.log").exists());
    assert!(dest.join("cache/also.txt").exists());
}

#[test]
fn test_missing_source_is_reported() {
    let tmp = TempDir::new().unwrap();
    let err = pack::pack(
        &tmp.path().join("does-not-exist"),
        &tmp.path().join("out.pack"),
        &plain(),
        &Reporter::silent(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::SourceNotFound(_)));
}

#[test]
fn test_progress_every_hundred_files() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("src");
    for i in 0..250 {
        write(&src, &format!("f{i:03}.txt"), format!("file {i}").as_bytes());
    }
    let target = tmp.path().join("out.pack");

    let (tx, rx) = mpsc::sync_channel(16);
    let reporter = Reporter::new(tx, CancelToken::new());
    let res = pack::pack(&src, &target, &plain(), &reporter).unwrap();
    drop(reporter);
    assert_eq!(res.file_count, 250);

    let states: Vec<_> = rx.iter().collect();
    let indices: Vec<usize> = states.iter().map(|s| s.index).collect();
    assert_eq!(indices, vec![0, 100, 200, 250]);
    assert!(states.iter().all(|s| s.total == 250 && s.error.is_none()));
    assert_eq!(states[1].current_file, "f100.txt");
    assert!(states[3].is_done());
}

#[test]
fn test_spawned_pack_and_list() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("src");
    write(&src, "x.txt", b"xxx");
    write(&src, "y.txt", b"yyyy");
    let target = tmp.path().join("out.pack");

    let mut last = None;
    let res = pack::spawn(src, target.clone(), secret(CompressKind::Zstd))
        .wait_with(|s| last = Some(s))
        .unwrap();
    assert_eq!(res.file_count, 2);
    assert!(last.map_or(false, |s| s.is_done()));

    let fat = list::spawn(target, CipherSettings::new("s3cret")).wait().unwrap();
    assert_eq!(fat.count, 2);
    assert_eq!(fat.orig_total(), 7);
}

#[test]
fn test_wrong_password_fails() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("src");
    write(&src, "a.txt", b"private");
    let target = tmp.path().join("out.pack");
    pack::pack(&src, &target, &secret(CompressKind::Gzip), &Reporter::silent()).unwrap();

    assert!(list::list(&target, &CipherSettings::new("wrong")).is_err());
}

#[test]
fn test_cancelled_pack_still_finalizes() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("src");
    write(&src, "a.txt", b"a");
    write(&src, "b.txt", b"b");
    let target = tmp.path().join("out.pack");

    let (tx, _rx) = mpsc::sync_channel(16);
    let cancel = CancelToken::new();
    cancel.cancel();
    let err = pack::pack(&src, &target, &plain(), &Reporter::new(tx, cancel)).unwrap_err();
    assert!(matches!(err, Error::Cancelled));

    let fat = list::list(&target, &CipherSettings::default()).unwrap();
    assert_eq!(fat.count, 0);
}

#[test]
fn test_duplicate_paths_last_entry_wins_on_unpack() {
    let tmp = TempDir::new().unwrap();
    let target = tmp.path().join("dup.pack");
    {
        let meta = FileMeta { mtime: 0, mode: 0o644, perm: 0o644 };
        let mut bundle = Bundle::create_file(&target, Transform::identity()).unwrap();
        bundle.add_file("same.txt", b"first", meta).unwrap();
        bundle.add_file("same.txt", b"second", meta).unwrap();
        bundle.finalize().unwrap();
    }
    let fat = list::list(&target, &CipherSettings::default()).unwrap();
    assert_eq!(fat.count, 2);

    let dest = tmp.path().join("dest");
    let res = unpack::unpack(&target, &dest, &UnpackOptions::default(), &Reporter::silent()).unwrap();
    assert_eq!(res.file_count, 2);
    assert_eq!(fs::read(dest.join("same.txt")).unwrap(), b"second");
}

#[test]
fn test_footer_points_back_to_header() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("src");
    write(&src, "a.txt", b"abc");
    let target = tmp.path().join("out.pack");
    pack::pack(&src, &target, &plain(), &Reporter::silent()).unwrap();

    let mut file = fs::File::open(&target).unwrap();
    let len = file.seek(SeekFrom::End(0)).unwrap();
    file.seek(SeekFrom::Start(len - FOOTER_SIZE as u64)).unwrap();
    let mut tail = vec![0u8; FOOTER_SIZE];
    file.read_exact(&mut tail).unwrap();
    assert_eq!(&tail[12..], b"IPACK");

    let framing = read_framing(&mut file).unwrap();
    assert_eq!(framing.start, 0);
    assert_eq!(framing.footer.pack_size as u64, len);
}

#[cfg(unix)]
#[test]
fn test_unreadable_source_is_reported_and_skipped() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("src");
    write(&src, "a.txt", b"aaa");
    std::os::unix::fs::symlink(src.join("missing"), src.join("b.lnk")).unwrap();
    write(&src, "c.txt", b"ccc");
    let target = tmp.path().join("out.pack");

    let (tx, rx) = mpsc::sync_channel(16);
    let reporter = Reporter::new(tx, CancelToken::new());
    let res = pack::pack(&src, &target, &plain(), &reporter).unwrap();
    drop(reporter);

    let failed: Vec<String> = rx
        .iter()
        .filter(|s| s.error.is_some())
        .map(|s| s.current_file)
        .collect();
    assert_eq!(failed, vec!["b.lnk".to_string()]);
    assert_eq!(res.file_count, 2);

    let fat = list::list(&target, &CipherSettings::default()).unwrap();
    let ranges: Vec<(&str, i64, i64)> =
        fat.items.iter().map(|i| (i.path.as_str(), i.offset, i.size)).collect();
    assert_eq!(ranges, vec![("a.txt", 0, 3), ("c.txt", 3, 3)]);
}

#[test]
fn test_unpack_refuses_paths_outside_target() {
    let tmp = TempDir::new().unwrap();
    let target = tmp.path().join("evil.pack");
    {
        let meta = FileMeta { mtime: 0, mode: 0o644, perm: 0o644 };
        let mut bundle = Bundle::create_file(&target, Transform::identity()).unwrap();
        bundle.add_file("../evil.txt", b"escaped", meta).unwrap();
        bundle.add_file("ok.txt", b"fine", meta).unwrap();
        bundle.finalize().unwrap();
    }

    let dest = tmp.path().join("dest");
    let (tx, rx) = mpsc::sync_channel(16);
    let reporter = Reporter::new(tx, CancelToken::new());
    let res = unpack::unpack(&target, &dest, &UnpackOptions::default(), &reporter).unwrap();
    drop(reporter);

    let failed: Vec<String> = rx
        .iter()
        .filter(|s| s.error.is_some())
        .map(|s| s.current_file)
        .collect();
    assert_eq!(failed, vec!["../evil.txt".to_string()]);
    assert!(!tmp.path().join("evil.txt").exists());
    assert_eq!(fs::read(dest.join("ok.txt")).unwrap(), b"fine");
    assert_eq!(res.byte_size, 4);
}

#[test]
fn test_repack_skips_target_inside_source() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("src");
    write(&src, "a.txt", b"abc");
    let target = src.join("out.pack");

    pack::pack(&src, &target, &plain(), &Reporter::silent()).unwrap();
    let res = pack::pack(&src, &target, &plain(), &Reporter::silent()).unwrap();
    assert_eq!(res.file_count, 1);

    let fat = list::list(&target, &CipherSettings::default()).unwrap();
    let paths: Vec<&str> = fat.items.iter().map(|i| i.path.as_str()).collect();
    assert_eq!(paths, vec!["a.txt"]);
    assert_eq!(fat.size, 3);
}

#[test]
fn test_cli_lists_container_from_stdin() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("src");
    write(&src, "hello.txt", b"hello");
    write(&src, "nested/world.txt", b"world!");
    let target = tmp.path().join("out.pack");
    pack::pack(&src, &target, &plain(), &Reporter::silent()).unwrap();

    let out = Command::new(env!("CARGO_BIN_EXE_ipack"))
        .args(["list", "-"])
        .env_remove("IPACK_KEY")
        .stdin(Stdio::from(fs::File::open(&target).unwrap()))
        .output()
        .unwrap();
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));

    let stdout = String::from_utf8(out.stdout).unwrap();
    assert!(stdout.contains("hello.txt (5 B)"));
    assert!(stdout.contains("nested/world.txt (6 B)"));
    assert!(stdout.contains("File count: 2"));
}
