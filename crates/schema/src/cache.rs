//! SchemasLRU: the two-tier, compare-exchange-based schema cache
//! (spec.md §4.E).

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use xapiand_core::endpoint::{Endpoint, Endpoints};
use xapiand_core::lru::Lru;
use xapiand_pool::{DatabaseHandler, DatabasePool};

use crate::error::{SchemaError, SchemaResult};
use crate::pointer::{bootstrap_schema, default_schema, percent_encode_path, SchemaBody, SchemaPointer};

pub const MAX_SCHEMA_RECURSION: usize = 10;
const SCHEMA_METADATA_KEY: &str = "_schema";
const BOOTSTRAP_PATH: &str = ".xapiand/index";

/// Whether `get` returned an already-cached value or installed/mutated a
/// fresh one (the caller uses this to decide whether a persist attempt is
/// worth making).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    Cached,
    Installed,
}

/// Tracks in-flight foreign-schema resolutions to detect cycles and bound
/// recursion depth across one top-level `get` call (spec.md §4.E).
#[derive(Default)]
struct ResolutionContext {
    visiting: HashSet<String>,
}

impl ResolutionContext {
    fn enter(&mut self, uri: &str) -> SchemaResult<()> {
        if self.visiting.len() > MAX_SCHEMA_RECURSION {
            return Err(SchemaError::RecursionLimit(MAX_SCHEMA_RECURSION));
        }
        if !self.visiting.insert(uri.to_string()) {
            return Err(SchemaError::CyclicReference(uri.to_string()));
        }
        Ok(())
    }

    fn leave(&mut self, uri: &str) {
        self.visiting.remove(uri);
    }
}

pub struct SchemasLRU {
    pool: Arc<DatabasePool>,
    local_schemas: Mutex<Lru<String, SchemaPointer>>,
    foreign_schemas: Mutex<Lru<String, SchemaPointer>>,
}

impl SchemasLRU {
    pub fn new(pool: Arc<DatabasePool>, max_size: Option<usize>) -> Self {
        SchemasLRU {
            pool,
            local_schemas: Mutex::new(Lru::new(max_size)),
            foreign_schemas: Mutex::new(Lru::new(max_size)),
        }
    }

    fn local_path(endpoints: &Endpoints) -> String {
        endpoints
            .write_target()
            .map(|e| e.path.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// `get(handler, requested_foreign_link)` (spec.md §4.E). Returns the
    /// resolved schema pointer, whether it was freshly installed, and the
    /// foreign URI if the resolved body is a link.
    pub fn get(
        &self,
        handler: &DatabaseHandler,
        requested_foreign_link: Option<&str>,
    ) -> SchemaResult<(SchemaPointer, Provenance, Option<String>)> {
        let local_path = Self::local_path(handler.endpoints());
        let (pointer, provenance) = self.get_local(handler, &local_path, requested_foreign_link)?;

        if let Some(uri) = pointer.foreign_uri().map(str::to_string) {
            let mut ctx = ResolutionContext::default();
            let resolved = self.resolve_foreign(&uri, &mut ctx)?;
            return Ok((resolved, provenance, Some(uri)));
        }

        Ok((pointer, provenance, None))
    }

    fn get_local(
        &self,
        handler: &DatabaseHandler,
        local_path: &str,
        requested_foreign_link: Option<&str>,
    ) -> SchemaResult<(SchemaPointer, Provenance)> {
        {
            let mut lru = self.local_schemas.lock();
            if let Some(current) = lru.peek(&local_path.to_string()).cloned() {
                if let Some(uri) = current.foreign_uri() {
                    if Some(uri) == requested_foreign_link {
                        return Ok((current, Provenance::Cached));
                    }
                }
                if let Some(link) = requested_foreign_link {
                    let installed = SchemaPointer::foreign(link, false);
                    let (winner, _) = self.compare_exchange(&mut lru, local_path, &current, installed);
                    return Ok((winner, Provenance::Installed));
                }
                return Ok((current, Provenance::Cached));
            }
        }

        let stored = handler.get_metadata(SCHEMA_METADATA_KEY)?;
        let fresh = match stored {
            Some(bytes) => SchemaPointer {
                body: SchemaPointer::deserialise(&bytes)?,
                persisted: true,
            },
            None => {
                if let Some(link) = requested_foreign_link {
                    SchemaPointer::foreign(link, false)
                } else if local_path != BOOTSTRAP_PATH && !local_path.is_empty() {
                    let uri = format!("{BOOTSTRAP_PATH}/{}", percent_encode_path(local_path));
                    SchemaPointer::foreign(uri, false)
                } else {
                    SchemaPointer::local(default_schema(), false)
                }
            }
        };

        let mut lru = self.local_schemas.lock();
        let winner = match lru.peek(&local_path.to_string()) {
            Some(existing) => existing.clone(),
            None => {
                lru.insert(local_path.to_string(), fresh.clone());
                fresh.clone()
            }
        };
        drop(lru);

        let persisted_winner = self.maybe_persist_local(handler, local_path, winner)?;
        Ok((persisted_winner, Provenance::Installed))
    }

    /// CAS-install `new` for `key` if the current value still equals
    /// `expected`; otherwise returns the current (winning) value. The
    /// `bool` reports whether the exchange actually happened, mirroring
    /// `original_source/src/schemas_lru.cc`'s `compare_exchange_strong`
    /// calls in `SchemasLRU::set`/`SchemasLRU::drop`.
    fn compare_exchange(
        &self,
        lru: &mut Lru<String, SchemaPointer>,
        key: &str,
        expected: &SchemaPointer,
        new: SchemaPointer,
    ) -> (SchemaPointer, bool) {
        match lru.peek(&key.to_string()) {
            Some(current) if current == expected => {
                lru.insert(key.to_string(), new.clone());
                (new, true)
            }
            Some(current) => (current.clone(), false),
            None => {
                lru.insert(key.to_string(), new.clone());
                (new, true)
            }
        }
    }

    /// Persist an unpersisted local schema pointer if the handler is
    /// writable; reconciles on conflict by reloading the authoritative
    /// metadata (spec.md §4.E).
    fn maybe_persist_local(&self, handler: &DatabaseHandler, local_path: &str, pointer: SchemaPointer) -> SchemaResult<SchemaPointer> {
        if pointer.persisted {
            return Ok(pointer);
        }
        let serialised = pointer.serialise()?;
        match handler.set_metadata(SCHEMA_METADATA_KEY, &serialised, true) {
            Ok(true) => {
                let persisted = SchemaPointer {
                    body: pointer.body.clone(),
                    persisted: true,
                };
                let mut lru = self.local_schemas.lock();
                lru.insert(local_path.to_string(), persisted.clone());
                Ok(persisted)
            }
            Ok(false) => {
                // Someone else persisted first: reload and adopt their value.
                let stored = handler
                    .get_metadata(SCHEMA_METADATA_KEY)?
                    .ok_or_else(|| SchemaError::Other("metadata vanished after conflict".into()))?;
                let winner = SchemaPointer {
                    body: SchemaPointer::deserialise(&stored)?,
                    persisted: true,
                };
                let mut lru = self.local_schemas.lock();
                lru.insert(local_path.to_string(), winner.clone());
                Ok(winner)
            }
            Err(e) => {
                let mut lru = self.local_schemas.lock();
                lru.erase(&local_path.to_string());
                Err(SchemaError::Checkout(e))
            }
        }
    }

    fn resolve_foreign(&self, uri: &str, ctx: &mut ResolutionContext) -> SchemaResult<SchemaPointer> {
        if uri == BOOTSTRAP_PATH {
            return Ok(SchemaPointer::local(bootstrap_schema(), true));
        }

        ctx.enter(uri)?;
        let result = (|| {
            {
                let lru = self.foreign_schemas.lock();
                if let Some(cached) = lru.peek(&uri.to_string()) {
                    return Ok(cached.clone());
                }
            }

            // `uri` is `<foreign_db_path>/<id_part>`; the id part identifies
            // the schema document within that foreign database.
            let (db_path, id_part) = uri.rsplit_once('/').unwrap_or((BOOTSTRAP_PATH, uri));
            let nested = DatabaseHandler::new(self.pool.clone(), Endpoints::single(Endpoint::local(db_path)));
            let docid = xapiand_core::hash::hash_bytes(id_part.as_bytes());
            let doc = nested.get_document(docid)?;
            let pointer = match doc {
                Some(bytes) => SchemaPointer {
                    body: SchemaPointer::deserialise(&bytes)?,
                    persisted: true,
                },
                None => SchemaPointer::local(bootstrap_schema(), false),
            };

            let mut lru = self.foreign_schemas.lock();
            lru.insert(uri.to_string(), pointer.clone());
            Ok(pointer)
        })();
        ctx.leave(uri);
        result
    }

    /// `set(handler, expected, new_body)`, grounded on
    /// `original_source/src/schemas_lru.cc`'s `SchemasLRU::set`: CAS
    /// `new_body` into `local_schemas[local_path]` against `expected`,
    /// persisting only on a winning exchange. The caller compares the
    /// returned pointer's body against `new_body`: equal means its write
    /// won; otherwise it lost the race and must retry against the
    /// winner (used by `XapiandManager::index_document`'s inferred-field
    /// merge, spec.md S2).
    pub fn set_local(&self, handler: &DatabaseHandler, expected: &SchemaPointer, new_body: SchemaBody) -> SchemaResult<SchemaPointer> {
        let local_path = Self::local_path(handler.endpoints());
        let candidate = SchemaPointer {
            body: new_body,
            persisted: false,
        };
        let (winner, exchanged) = {
            let mut lru = self.local_schemas.lock();
            self.compare_exchange(&mut lru, &local_path, expected, candidate)
        };
        if !exchanged {
            return Ok(winner);
        }
        self.maybe_persist_local(handler, &local_path, winner)
    }

    /// `set`'s counterpart for a *resolved* foreign schema: CAS
    /// `foreign_schemas[uri]` and persist by replacing the backing
    /// document in the foreign database, at the same hashed id
    /// `resolve_foreign` reads from. Used when `get`'s `foreign_uri`
    /// came back `Some`, so the inferred-field merge lands on the schema
    /// that was actually resolved rather than the local link pointing at
    /// it.
    pub fn set_foreign(&self, uri: &str, expected: &SchemaPointer, new_body: SchemaBody) -> SchemaResult<SchemaPointer> {
        let candidate = SchemaPointer {
            body: new_body,
            persisted: false,
        };
        let (winner, exchanged) = {
            let mut lru = self.foreign_schemas.lock();
            self.compare_exchange(&mut lru, uri, expected, candidate)
        };
        if !exchanged {
            return Ok(winner);
        }

        let (db_path, id_part) = uri.rsplit_once('/').unwrap_or((BOOTSTRAP_PATH, uri));
        let nested = DatabaseHandler::new(self.pool.clone(), Endpoints::single(Endpoint::local(db_path)));
        let docid = xapiand_core::hash::hash_bytes(id_part.as_bytes());
        let serialised = winner.serialise()?;
        match nested.patch(docid, &serialised) {
            Ok(()) => {
                let persisted = SchemaPointer {
                    body: winner.body,
                    persisted: true,
                };
                let mut lru = self.foreign_schemas.lock();
                lru.insert(uri.to_string(), persisted.clone());
                Ok(persisted)
            }
            Err(e) => {
                let mut lru = self.foreign_schemas.lock();
                lru.insert(uri.to_string(), expected.clone());
                Err(SchemaError::Checkout(e))
            }
        }
    }

    /// `drop(handler, expected)`, grounded on the same file's
    /// `SchemasLRU::drop`: CAS the local entry back to a fresh default
    /// schema and persist that reset, reverting the cache entry if the
    /// persist fails.
    pub fn drop_local(&self, handler: &DatabaseHandler, expected: &SchemaPointer) -> SchemaResult<SchemaPointer> {
        let local_path = Self::local_path(handler.endpoints());
        let reset = SchemaPointer::local(default_schema(), false);
        let (winner, exchanged) = {
            let mut lru = self.local_schemas.lock();
            self.compare_exchange(&mut lru, &local_path, expected, reset.clone())
        };
        if !exchanged {
            return Ok(winner);
        }
        match handler.set_metadata(SCHEMA_METADATA_KEY, &reset.serialise()?, false) {
            Ok(_) => {
                let persisted = SchemaPointer {
                    body: reset.body,
                    persisted: true,
                };
                let mut lru = self.local_schemas.lock();
                lru.insert(local_path, persisted.clone());
                Ok(persisted)
            }
            Err(e) => {
                let mut lru = self.local_schemas.lock();
                lru.insert(local_path, expected.clone());
                Err(SchemaError::Checkout(e))
            }
        }
    }
}
