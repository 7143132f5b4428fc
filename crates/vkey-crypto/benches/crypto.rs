use vkey_core::VaultId;
use vkey_crypto::{
    decrypt_object, encrypt_object, generate_master_key, unwrap, wrap, DeviceWrapKey,
};

fn make_data(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
        .collect()
}

#[divan::bench]
fn bench_wrap(bencher: divan::Bencher) {
    let master = generate_master_key().unwrap();
    let device = DeviceWrapKey::generate().unwrap();
    let vault = VaultId::new_random();
    bencher.bench(|| {
        wrap(
            divan::black_box(&master),
            divan::black_box(&device),
            divan::black_box(&vault),
        )
        .unwrap()
    });
}

#[divan::bench]
fn bench_unwrap(bencher: divan::Bencher) {
    let master = generate_master_key().unwrap();
    let device = DeviceWrapKey::generate().unwrap();
    let vault = VaultId::new_random();
    let wrapped = wrap(&master, &device, &vault).unwrap();
    bencher.bench(|| {
        unwrap(
            divan::black_box(&wrapped),
            divan::black_box(&device),
            divan::black_box(&vault),
        )
        .unwrap()
    });
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_encrypt_object(bencher: divan::Bencher, size: usize) {
    let master = generate_master_key().unwrap();
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| encrypt_object(divan::black_box(&master), divan::black_box(&data)).unwrap());
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_decrypt_object(bencher: divan::Bencher, size: usize) {
    let master = generate_master_key().unwrap();
    let data = make_data(size);
    let encrypted = encrypt_object(&master, &data).unwrap();
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| decrypt_object(divan::black_box(&master), divan::black_box(&encrypted)).unwrap());
}

fn main() {
    divan::main();
}
