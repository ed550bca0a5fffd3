//! The two-tier SchemasLRU cache (spec.md §4.E).

pub mod cache;
pub mod error;
pub mod pointer;

pub use cache::{Provenance, SchemasLRU, MAX_SCHEMA_RECURSION};
pub use error::{SchemaError, SchemaResult};
pub use pointer::{
    bootstrap_schema, default_schema, infer_field_types, merge_fields, percent_encode_path, SchemaBody, SchemaPointer,
};

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use xapiand_core::backend::MemoryBackendFactory;
    use xapiand_core::endpoint::{Endpoint, Endpoints};
    use xapiand_pool::{DatabaseHandler, DatabasePool, PoolConfig};

    use super::*;

    fn handler_for(path: &str) -> (DatabaseHandler, Arc<DatabasePool>) {
        // `IndexHandle` journals real WAL files under the pool root
        // (xapiand-pool's handle.rs), so tests need a throwaway
        // directory rather than the shared `/tmp`.
        let root: PathBuf = tempfile::tempdir().unwrap().into_path();
        let pool = Arc::new(DatabasePool::new(root, Arc::new(MemoryBackendFactory), PoolConfig::default()));
        let handler = DatabaseHandler::new(pool.clone(), Endpoints::single(Endpoint::local(path)));
        (handler, pool)
    }

    #[test]
    fn miss_on_non_root_path_synthesizes_foreign_link() {
        let (handler, pool) = handler_for("/my-index");
        let cache = SchemasLRU::new(pool, Some(64));
        let (_pointer, provenance, foreign_uri) = cache.get(&handler, None).unwrap();
        assert_eq!(provenance, Provenance::Installed);
        assert!(foreign_uri.unwrap().starts_with(".xapiand/index"));
        assert_eq!(
            handler.get_metadata("_schema").unwrap().is_some(),
            true,
            "the foreign link itself must have been persisted"
        );
    }

    #[test]
    fn bootstrap_path_resolves_without_recursion() {
        let (handler, pool) = handler_for(".xapiand/index");
        let cache = SchemasLRU::new(pool, Some(64));
        let (pointer, _provenance, foreign_uri) = cache.get(&handler, None).unwrap();
        assert!(foreign_uri.is_none());
        match pointer.body {
            SchemaBody::Local(_) => {}
            SchemaBody::Foreign(_) => panic!("root schema must not be a foreign link"),
        }
    }

    #[test]
    fn second_get_is_a_cache_hit() {
        let (handler, pool) = handler_for("/my-index-2");
        let cache = SchemasLRU::new(pool, Some(64));
        let (_first, first_provenance, _) = cache.get(&handler, None).unwrap();
        assert_eq!(first_provenance, Provenance::Installed);
        let (_second, second_provenance, _) = cache.get(&handler, None).unwrap();
        assert_eq!(second_provenance, Provenance::Cached);
    }

    #[test]
    fn percent_encoding_escapes_reserved_bytes() {
        let encoded = percent_encode_path("/my index?");
        assert_eq!(encoded, "/my%20index%3F");
    }

    #[test]
    fn set_local_cas_persists_the_winner_and_rejects_a_stale_expected() {
        let (handler, pool) = handler_for(".xapiand/index");
        let cache = SchemasLRU::new(pool, Some(64));
        let (current, _, _) = cache.get(&handler, None).unwrap();

        let merged = merge_fields(&current.body, &[("a".to_string(), "integer")]).unwrap();
        let winner = cache.set_local(&handler, &current, merged.clone()).unwrap();
        assert_eq!(winner.body, merged);
        assert!(winner.persisted);

        let stored = handler.get_metadata("_schema").unwrap().unwrap();
        assert_eq!(SchemaPointer::deserialise(&stored).unwrap(), merged);

        // A second CAS against the now-stale `current` must lose and
        // hand back the already-installed winner instead of clobbering it.
        let stale_merge = merge_fields(&current.body, &[("b".to_string(), "string")]).unwrap();
        let lost = cache.set_local(&handler, &current, stale_merge).unwrap();
        assert_eq!(lost.body, merged, "a stale CAS must return the current winner unchanged");
    }

    #[test]
    fn drop_local_resets_to_default_and_reverts_on_cas_failure() {
        let (handler, pool) = handler_for(".xapiand/index");
        let cache = SchemasLRU::new(pool, Some(64));
        let (current, _, _) = cache.get(&handler, None).unwrap();

        let merged = merge_fields(&current.body, &[("a".to_string(), "integer")]).unwrap();
        let installed = cache.set_local(&handler, &current, merged).unwrap();

        let reset = cache.drop_local(&handler, &installed).unwrap();
        assert_eq!(reset.body, SchemaBody::Local(default_schema()));

        let stored = handler.get_metadata("_schema").unwrap().unwrap();
        assert_eq!(SchemaPointer::deserialise(&stored).unwrap(), reset.body);

        // Dropping again against the now-stale `installed` pointer must
        // lose the CAS and hand back the current (reset) value instead.
        let lost = cache.drop_local(&handler, &installed).unwrap();
        assert_eq!(lost.body, reset.body);
    }
}
