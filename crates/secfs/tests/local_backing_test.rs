//! The encrypted layer on top of a real directory.

use std::io::{Read, Write};

use secfs::{Mount, MountOptions, OpenFlags, SeekFrom};
use secfs_backing::LocalBacking;
use secfs_crypto::{derive_mount_key, KdfParams, SoftwareAes};
use secrecy::SecretString;

fn test_params() -> KdfParams {
    KdfParams {
        mem_cost_kib: 1024,
        time_cost: 1,
        parallelism: 1,
    }
}

#[test]
fn passphrase_mount_roundtrip_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let backing = LocalBacking::new(dir.path()).unwrap();
    let passphrase = SecretString::from("correct horse battery staple".to_string());
    let salt = [7u8; 16];
    let key = derive_mount_key(&passphrase, &salt, &test_params()).unwrap();

    Mount::format(&backing, &SoftwareAes::new(&key), "").unwrap();
    let mount = Mount::with_key(backing, &key, MountOptions::default()).unwrap();

    let data: Vec<u8> = (0..1234u32).map(|i| (i * 31 % 256) as u8).collect();
    let mut f = mount
        .open("report.pdf", OpenFlags::read_write().create())
        .unwrap();
    f.write_all(&data).unwrap();
    f.seek(SeekFrom::Start(1000)).unwrap();
    f.write_all(b"edited").unwrap();
    f.close().unwrap();

    let on_disk = std::fs::read(dir.path().join("report.pdf.sec")).unwrap();
    assert_eq!(on_disk.len(), 48 + 1234usize.div_ceil(16) * 16);
    assert!(
        !on_disk.windows(6).any(|w| w == b"edited"),
        "plaintext must not reach the disk"
    );

    let mut expected = data.clone();
    expected[1000..1006].copy_from_slice(b"edited");

    let mut f = mount.open("report.pdf", OpenFlags::read_only()).unwrap();
    let mut out = Vec::new();
    f.read_to_end(&mut out).unwrap();
    f.close().unwrap();
    assert_eq!(out, expected);

    assert_eq!(mount.list("").unwrap(), vec!["report.pdf"]);
    mount.unmount().unwrap();

    // Same passphrase and salt reproduce the key
    let again = derive_mount_key(&passphrase, &salt, &test_params()).unwrap();
    let backing = LocalBacking::new(dir.path()).unwrap();
    let mount = Mount::with_key(backing, &again, MountOptions::default()).unwrap();
    assert_eq!(mount.stat("report.pdf").unwrap().size, 1234);
    mount.unmount().unwrap();
}

#[test]
fn wrong_passphrase_refused() {
    let dir = tempfile::tempdir().unwrap();
    let backing = LocalBacking::new(dir.path()).unwrap();
    let salt = [1u8; 16];
    let good = derive_mount_key(&SecretString::from("right".to_string()), &salt, &test_params())
        .unwrap();
    let bad = derive_mount_key(&SecretString::from("wrong".to_string()), &salt, &test_params())
        .unwrap();

    Mount::format(&backing, &SoftwareAes::new(&good), "").unwrap();
    let err = Mount::with_key(backing, &bad, MountOptions::default()).unwrap_err();
    assert!(err.is_corruption());
}
