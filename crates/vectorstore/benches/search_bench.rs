use criterion::{Criterion, criterion_group, criterion_main};
use mdqa_core::Chunk;
use mdqa_vectorstore::VectorStore;

fn build_store(n: usize, dims: usize) -> VectorStore {
  let mut store = VectorStore::new(dims).unwrap();
  let mut ids = Vec::with_capacity(n);
  let mut vectors = Vec::with_capacity(n);
  let mut chunks = Vec::with_capacity(n);
  for i in 0..n {
    let chunk = Chunk::new(format!("/doc{i}.md"), 0, format!("chunk {i}"), vec![]);
    ids.push(chunk.chunk_id);
    let mut v = vec![0f32; dims];
    v[i % dims] = 1.0;
    vectors.push(v);
    chunks.push(chunk);
  }
  store.add_with_ids(&ids, &vectors, &chunks).unwrap();
  store
}

fn bench_search(c: &mut Criterion) {
  let store = build_store(5000, 64);
  let query = {
    let mut v = vec![0f32; 64];
    v[0] = 1.0;
    v
  };
  c.bench_function("search_5000_vectors", |b| b.iter(|| store.search(&query, 10).unwrap()));
}

criterion_group!(benches, bench_search);
criterion_main!(benches);
