//! Snapshot I/O hook points (spec §6, §7 `SnapshotFormat`).
//!
//! Grounded on the design notes' "reflection-heavy boxed operations" shape:
//! formatters are `Box<dyn Fn(&dyn Any) -> Vec<u8>>` /
//! `Box<dyn Fn(&[u8]) -> Box<dyn Any>>` pairs keyed by `TypeId`, the same
//! vtable-of-closures pattern [[repository]]'s `PoolFactory` uses to
//! construct a pool for a type id without runtime reflection. Formatters
//! are registered out-of-band from `World` itself (a `SnapshotRegistry` is
//! built by the host and handed to `save_full_snapshot`/
//! `load_full_snapshot`), matching §6: "a per-type formatter registered
//! out-of-band." The wire format is a flat, version-tagged byte stream;
//! `serde` is not required here (only for component types that opt into
//! deriving it under the `serialize` feature), per SPEC_FULL §6.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::io::{self, Read, Write};

use crate::component::Component;
use crate::error::{Error, Result};
use crate::world::World;

const MAGIC: &[u8; 4] = b"ECSC";
const WIRE_VERSION: u32 = 1;

struct FormatterEntry {
    type_name: &'static str,
    serialize: Box<dyn Fn(&dyn Any) -> Vec<u8> + Send + Sync>,
    deserialize: Box<dyn Fn(&[u8]) -> Box<dyn Any> + Send + Sync>,
}

/// Per-type formatters plus an ordered post-load migration list, built by
/// the host and passed to `save_full_snapshot`/`load_full_snapshot`.
#[derive(Default)]
pub struct SnapshotRegistry {
    formatters: HashMap<TypeId, FormatterEntry>,
    by_name: HashMap<&'static str, TypeId>,
    migrations: Vec<(u32, fn(&mut World))>,
}

impl SnapshotRegistry {
    pub fn new() -> Self {
        SnapshotRegistry::default()
    }

    /// Registers the formatter pair for `T`. `serialize`/`deserialize` are
    /// plain closures over `T`; the registry itself only ever deals in
    /// `dyn Any`, matching the boxed adapter surface the pool repository
    /// already exposes for editor tools.
    pub fn register_formatter<T: Component>(
        &mut self,
        serialize: impl Fn(&T) -> Vec<u8> + Send + Sync + 'static,
        deserialize: impl Fn(&[u8]) -> T + Send + Sync + 'static,
    ) {
        let type_id = TypeId::of::<T>();
        let type_name = std::any::type_name::<T>();
        let entry = FormatterEntry {
            type_name,
            serialize: Box::new(move |value| {
                let value = value
                    .downcast_ref::<T>()
                    .unwrap_or_else(|| panic!("snapshot formatter type mismatch for {type_name}"));
                serialize(value)
            }),
            deserialize: Box::new(move |bytes| Box::new(deserialize(bytes))),
        };
        self.by_name.insert(type_name, type_id);
        self.formatters.insert(type_id, entry);
    }

    /// Registers a migration run in ascending `order` after a
    /// `load_full_snapshot` restore (§6).
    pub fn register_migration(&mut self, order: u32, migrate: fn(&mut World)) {
        self.migrations.push((order, migrate));
    }

    fn get(&self, type_id: TypeId) -> Option<&FormatterEntry> {
        self.formatters.get(&type_id)
    }

    fn get_by_name(&self, name: &str) -> Option<(TypeId, &FormatterEntry)> {
        let type_id = *self.by_name.get(name)?;
        self.formatters.get(&type_id).map(|entry| (type_id, entry))
    }

    fn ordered_migrations(&self) -> Vec<fn(&mut World)> {
        let mut migrations = self.migrations.clone();
        migrations.sort_by_key(|(order, _)| *order);
        migrations.into_iter().map(|(_, f)| f).collect()
    }
}

// `fn(&mut World)` is `Copy`, so a manual `Clone` for the `(u32, fn(..))`
// pairs is just a derive away, but `#[derive(Clone)]` on the registry
// itself would also require `FormatterEntry: Clone`, which it isn't
// (boxed closures aren't). Clone only the small migrations vector instead.
impl Clone for SnapshotRegistry {
    fn clone(&self) -> Self {
        SnapshotRegistry {
            formatters: HashMap::new(),
            by_name: HashMap::new(),
            migrations: self.migrations.clone(),
        }
    }
}

pub(crate) fn write_u32(w: &mut dyn Write, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub(crate) fn write_u16(w: &mut dyn Write, v: u16) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub(crate) fn write_bytes(w: &mut dyn Write, bytes: &[u8]) -> io::Result<()> {
    write_u32(w, bytes.len() as u32)?;
    w.write_all(bytes)
}

pub(crate) fn write_str(w: &mut dyn Write, s: &str) -> io::Result<()> {
    write_bytes(w, s.as_bytes())
}

pub(crate) fn read_u32(r: &mut dyn Read) -> Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)
        .map_err(|e| Error::SnapshotFormat(format!("truncated stream: {e}")))?;
    Ok(u32::from_le_bytes(buf))
}

pub(crate) fn read_u16(r: &mut dyn Read) -> Result<u16> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)
        .map_err(|e| Error::SnapshotFormat(format!("truncated stream: {e}")))?;
    Ok(u16::from_le_bytes(buf))
}

pub(crate) fn read_bytes(r: &mut dyn Read) -> Result<Vec<u8>> {
    let len = read_u32(r)? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)
        .map_err(|e| Error::SnapshotFormat(format!("truncated stream: {e}")))?;
    Ok(buf)
}

pub(crate) fn read_str(r: &mut dyn Read) -> Result<String> {
    let bytes = read_bytes(r)?;
    String::from_utf8(bytes).map_err(|e| Error::SnapshotFormat(format!("invalid utf-8: {e}")))
}

pub(crate) fn write_header(w: &mut dyn Write) -> io::Result<()> {
    w.write_all(MAGIC)?;
    write_u32(w, WIRE_VERSION)
}

pub(crate) fn read_header(r: &mut dyn Read) -> Result<u32> {
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)
        .map_err(|e| Error::SnapshotFormat(format!("truncated stream: {e}")))?;
    if &magic != MAGIC {
        return Err(Error::SnapshotFormat("magic header mismatch".to_string()));
    }
    read_u32(r)
}

pub(crate) fn formatter_for(registry: &SnapshotRegistry, type_id: TypeId) -> Option<(&'static str, &(dyn Fn(&dyn Any) -> Vec<u8> + Send + Sync))> {
    registry.get(type_id).map(|e| (e.type_name, &*e.serialize))
}

pub(crate) fn deserializer_for<'a>(
    registry: &'a SnapshotRegistry,
    name: &str,
) -> Option<(TypeId, &'a (dyn Fn(&[u8]) -> Box<dyn Any> + Send + Sync))> {
    registry.get_by_name(name).map(|(id, e)| (id, &*e.deserialize))
}

pub(crate) fn run_migrations(registry: &SnapshotRegistry, world: &mut World) {
    for migrate in registry.ordered_migrations() {
        migrate(world);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Marker(u32);
    impl Component for Marker {
        type Storage = crate::storage::VecPool<Marker>;
    }

    #[test]
    fn formatter_round_trips_bytes() {
        let mut registry = SnapshotRegistry::new();
        registry.register_formatter::<Marker>(|m| m.0.to_le_bytes().to_vec(), |bytes| {
            Marker(u32::from_le_bytes(bytes.try_into().unwrap()))
        });

        let type_id = TypeId::of::<Marker>();
        let (name, ser) = formatter_for(&registry, type_id).unwrap();
        let bytes = ser(&Marker(42) as &dyn Any);
        let (found_id, de) = deserializer_for(&registry, name).unwrap();
        assert_eq!(found_id, type_id);
        let value = de(&bytes);
        assert_eq!(value.downcast_ref::<Marker>().unwrap().0, 42);
    }
}
