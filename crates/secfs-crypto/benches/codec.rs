use secfs_crypto::{BlockCipher, ContentDigest, MountKey, SoftwareAes};

fn make_data(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
        .collect()
}

#[divan::bench(args = [64, 4096, 65536])]
fn bench_encrypt_blocks(bencher: divan::Bencher, size: usize) {
    let cipher = SoftwareAes::new(&MountKey::from_bytes([0xAB; 16]));
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .with_inputs(|| data.clone())
        .bench_local_refs(|buf| cipher.encrypt(divan::black_box(buf)).unwrap());
}

#[divan::bench(args = [64, 4096, 65536])]
fn bench_decrypt_blocks(bencher: divan::Bencher, size: usize) {
    let cipher = SoftwareAes::new(&MountKey::from_bytes([0xAB; 16]));
    let mut data = make_data(size);
    cipher.encrypt(&mut data).unwrap();
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .with_inputs(|| data.clone())
        .bench_local_refs(|buf| cipher.decrypt(divan::black_box(buf)).unwrap());
}

#[divan::bench(args = [4096, 65536])]
fn bench_content_digest(bencher: divan::Bencher, size: usize) {
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| ContentDigest::of(divan::black_box(&data)));
}

fn main() {
    divan::main();
}
