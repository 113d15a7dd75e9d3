use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use sql_loader::rewrite::{DialectRewriter, RewriteConfig};
use std::hint::black_box;

fn his_rewriter() -> DialectRewriter {
    DialectRewriter::new(&RewriteConfig {
        source_schema: Some("EMR_HIS".to_string()),
        target_schema: "public".to_string(),
        strip_table_prefix: Some("V_HIS_".to_string()),
    })
}

fn bench_rewrite_shapes(c: &mut Criterion) {
    let rewriter = his_rewriter();
    let stats = rewriter.new_stats();

    let plain = "INSERT INTO t VALUES (1, 'a', 'b');";
    let his = "INSERT INTO EMR_HIS.V_HIS_KSDMDZB (KSDM, KSMC, GXSJ) VALUES ('001', '内科', '13/07/2022 16:50');";
    let to_date = "INSERT INTO EMR_HIS.V_HIS_BRXX (ID, CSRQ) VALUES (1, TO_DATE('2022-07-13 08:05:09', 'YYYY-MM-DD HH24:MI:SS'));";
    let functions = "UPDATE EMR_HIS.V_HIS_BRXX SET XGSJ = SYSDATE, BZ = NVL(BZ, 'x') WHERE BZ = '';";
    let already = r#"INSERT INTO "public"."KSDMDZB" ("KSDM", "GXSJ") VALUES ('001', '2022-07-13 16:50:00'::timestamp);"#;

    let mut group = c.benchmark_group("rewrite_statement");
    for (name, sql) in [
        ("plain", plain),
        ("his_insert", his),
        ("to_date", to_date),
        ("functions", functions),
        ("already_rewritten", already),
    ] {
        group.throughput(Throughput::Bytes(sql.len() as u64));
        group.bench_function(name, |b| {
            b.iter(|| black_box(rewriter.rewrite(black_box(sql), &stats)))
        });
    }
    group.finish();
}

fn bench_long_values(c: &mut Criterion) {
    let rewriter = his_rewriter();
    let stats = rewriter.new_stats();

    let values: Vec<String> = (0..200)
        .map(|i| format!("('{:04}', 'note {}; it''s long', '01/02/2021')", i, i))
        .collect();
    let sql = format!(
        "INSERT INTO EMR_HIS.V_HIS_KSDMDZB (KSDM, BZ, GXSJ) VALUES {};",
        values.join(", ")
    );

    let mut group = c.benchmark_group("rewrite_multi_row");
    group.throughput(Throughput::Bytes(sql.len() as u64));
    group.bench_function("200_rows", |b| {
        b.iter(|| black_box(rewriter.rewrite(black_box(&sql), &stats)))
    });
    group.finish();
}

criterion_group!(benches, bench_rewrite_shapes, bench_long_values);
criterion_main!(benches);
