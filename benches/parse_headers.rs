use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use evented_http::http::request::parse;

const SHORT: &[u8] = b"GET / HTTP/1.1\r\nHost: example.org\r\n\r\n";

const MEDIUM: &[u8] = b"\
GET /index.html HTTP/1.1\r\n\
Host: example.org\r\n\
Accept: */*\r\n\
Accept-Encoding: gzip, deflate, br\r\n\
Accept-Language: en-US,en;q=0.5\r\n\
Cache-Control: no-cache\r\n\
Connection: keep-alive\r\n\
User-Agent: Mozilla/5.0 (X11; Linux x86_64; rv:109.0) Gecko/20100101 Firefox/109.0\r\n\r\n";

fn benchmark(c: &mut Criterion) {
    for (name, req) in [("short", SHORT), ("medium", MEDIUM)] {
        c.bench_with_input(BenchmarkId::new("parse", name), black_box(req), |b, i| {
            b.iter(|| parse(i));
        });
    }
}

criterion_group!(benches, benchmark);
criterion_main!(benches);
