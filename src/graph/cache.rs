
use log::{debug, info, warn};
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use crate::graph::allele_graph::AlleleGraph;
use crate::graph::builder::{build_graph, GraphConfig};
use crate::graph::kmer_index::KmerIndex;
use crate::msa::parser::parse_msa_file;
use crate::util::file_io::{load_json, save_json};

/// Default cache root; graphs and indices get their own subdirectories
pub const DEFAULT_CACHE_DIR: &str = ".cache";

/// Disk cache for built graphs and k-mer indices. Entries are gzipped JSON
/// keyed by a deterministic fingerprint of the build arguments; anything
/// absent or unreadable is silently rebuilt.
pub struct GraphCache {
    /// cache root directory
    root: PathBuf,
    /// when false, neither reads nor writes happen
    enabled: bool
}

impl GraphCache {
    pub fn new(root: &Path, enabled: bool) -> GraphCache {
        GraphCache {
            root: root.to_path_buf(),
            enabled
        }
    }

    fn graphs_dir(&self) -> PathBuf {
        self.root.join("graphs")
    }

    fn indices_dir(&self) -> PathBuf {
        self.root.join("indices")
    }

    /// Deterministic key for a (file, config) graph build.
    pub fn graph_fingerprint(alignment_file: &Path, config: &GraphConfig) -> String {
        let stem = alignment_file.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "alignment".to_string());

        let mut hasher = rustc_hash::FxHasher::default();
        config.allele_regexes.hash(&mut hasher);
        config.specific_alleles.hash(&mut hasher);
        config.excluded_alleles.hash(&mut hasher);
        config.num_alt_alleles.hash(&mut hasher);
        config.join_same_sequence.hash(&mut hasher);
        format!("{stem}_{:016x}", hasher.finish())
    }

    /// Deterministic key for an index over a fingerprinted graph.
    pub fn index_fingerprint(graph_fingerprint: &str, k: usize) -> String {
        format!("{graph_fingerprint}_k{k}")
    }

    /// Returns the cached graph for these arguments, or parses the alignment
    /// and builds it, caching the result.
    /// # Arguments
    /// * `alignment_file` - the IMGT alignment file to parse on a cache miss
    /// * `config` - graph build configuration
    /// # Errors
    /// * on parse or build errors; cache I/O problems only warn
    pub fn load_or_build_graph(
        &self, alignment_file: &Path, config: &GraphConfig
    ) -> Result<(AlleleGraph, String), Box<dyn std::error::Error>> {
        let fingerprint = GraphCache::graph_fingerprint(alignment_file, config);
        let cache_path = self.graphs_dir().join(format!("{fingerprint}.json.gz"));

        if self.enabled && cache_path.exists() {
            match load_json::<AlleleGraph>(&cache_path) {
                Ok(mut graph) => {
                    graph.rebuild_lookups();
                    info!("Loaded cached graph from {cache_path:?}");
                    return Ok((graph, fingerprint));
                },
                Err(e) => {
                    warn!("Failed to load cached graph ({e}), rebuilding");
                }
            }
        }

        let alignment = parse_msa_file(alignment_file)?;
        let graph = build_graph(&alignment, config)?;

        if self.enabled {
            if let Err(e) = std::fs::create_dir_all(self.graphs_dir())
                .map_err(|e| e.into())
                .and_then(|()| save_json(&graph, &cache_path)) {
                warn!("Failed to cache graph to {cache_path:?}: {e}");
            } else {
                debug!("Cached graph to {cache_path:?}");
            }
        }
        Ok((graph, fingerprint))
    }

    /// Returns the cached k-mer index for a fingerprinted graph, or builds
    /// and caches it.
    /// # Arguments
    /// * `graph` - the graph to index on a cache miss
    /// * `graph_fingerprint` - the key of that graph
    /// * `k` - k-mer length
    /// # Errors
    /// * on index build errors; cache I/O problems only warn
    pub fn load_or_build_index(
        &self, graph: &AlleleGraph, graph_fingerprint: &str, k: usize
    ) -> Result<KmerIndex, Box<dyn std::error::Error>> {
        let fingerprint = GraphCache::index_fingerprint(graph_fingerprint, k);
        let cache_path = self.indices_dir().join(format!("{fingerprint}.json.gz"));

        if self.enabled && cache_path.exists() {
            match load_json::<KmerIndex>(&cache_path) {
                Ok(index) => {
                    info!("Loaded cached index from {cache_path:?}");
                    return Ok(index);
                },
                Err(e) => {
                    warn!("Failed to load cached index ({e}), rebuilding");
                }
            }
        }

        let index = KmerIndex::build(graph, k)?;

        if self.enabled {
            if let Err(e) = std::fs::create_dir_all(self.indices_dir())
                .map_err(|e| e.into())
                .and_then(|()| save_json(&index, &cache_path)) {
                warn!("Failed to cache index to {cache_path:?}: {e}");
            } else {
                debug!("Cached index to {cache_path:?}");
            }
        }
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    fn write_alignment(dir: &Path) -> PathBuf {
        let path = dir.join("A_gen.txt");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "Test Alignment\n\n gDNA 0\n A*01 ACGT\n A*02 ---A\n").unwrap();
        path
    }

    #[test]
    fn test_fingerprints_deterministic() {
        let config = GraphConfig::default();
        let fp1 = GraphCache::graph_fingerprint(Path::new("data/A_gen.txt"), &config);
        let fp2 = GraphCache::graph_fingerprint(Path::new("data/A_gen.txt"), &config);
        assert_eq!(fp1, fp2);
        assert!(fp1.starts_with("A_gen_"));

        let other = GraphCache::graph_fingerprint(Path::new("data/A_gen.txt"), &GraphConfig {
            num_alt_alleles: Some(5),
            ..Default::default()
        });
        assert_ne!(fp1, other);

        assert_ne!(
            GraphCache::index_fingerprint(&fp1, 8),
            GraphCache::index_fingerprint(&fp1, 10)
        );
    }

    #[test]
    fn test_graph_round_trip() {
        let temp = tempfile::tempdir().unwrap();
        let alignment_file = write_alignment(temp.path());
        let cache = GraphCache::new(&temp.path().join("cache"), true);
        let config = GraphConfig::default();

        let (built, fp1) = cache.load_or_build_graph(&alignment_file, &config).unwrap();
        assert!(cache.graphs_dir().join(format!("{fp1}.json.gz")).exists());

        // second call round-trips through the cached JSON
        let (loaded, fp2) = cache.load_or_build_graph(&alignment_file, &config).unwrap();
        assert_eq!(fp1, fp2);
        assert_eq!(built, loaded);
        assert_eq!(loaded.allele_index().index_of("A*02"), Some(1));
    }

    #[test]
    fn test_index_round_trip() {
        let temp = tempfile::tempdir().unwrap();
        let alignment_file = write_alignment(temp.path());
        let cache = GraphCache::new(&temp.path().join("cache"), true);
        let config = GraphConfig::default();

        let (graph, fp) = cache.load_or_build_graph(&alignment_file, &config).unwrap();
        let built = cache.load_or_build_index(&graph, &fp, 2).unwrap();
        let loaded = cache.load_or_build_index(&graph, &fp, 2).unwrap();
        assert_eq!(built, loaded);
    }

    #[test]
    fn test_disabled_cache_writes_nothing() {
        let temp = tempfile::tempdir().unwrap();
        let alignment_file = write_alignment(temp.path());
        let cache_root = temp.path().join("cache");
        let cache = GraphCache::new(&cache_root, false);

        let (_, _) = cache.load_or_build_graph(&alignment_file, &GraphConfig::default()).unwrap();
        assert!(!cache_root.exists());
    }
}
