use fanout_crypto::{decrypt, encrypt, generate_key_iv};

fn make_data(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
        .collect()
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_encrypt_chunk(bencher: divan::Bencher, size: usize) {
    let material = generate_key_iv().unwrap();
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            encrypt(
                divan::black_box(&data),
                divan::black_box(material.key()),
                divan::black_box(material.iv()),
            )
            .unwrap()
        });
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_decrypt_chunk(bencher: divan::Bencher, size: usize) {
    let material = generate_key_iv().unwrap();
    let data = make_data(size);
    let encrypted = encrypt(&data, material.key(), material.iv()).unwrap();
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            decrypt(
                divan::black_box(&encrypted),
                divan::black_box(material.key()),
                divan::black_box(material.iv()),
            )
            .unwrap()
        });
}

fn main() {
    divan::main();
}
