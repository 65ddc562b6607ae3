//! Entity-set serializer and reconciler.
//!
//! Record layout:
//! ```text
//! [type name: string][payload: i32 len + bytes][origin flag: bool][origin key: string, if flagged]
//! payload = [persistent id: u64][object state ...]
//! ```
//!
//! # Invariants
//! - Map objects (with an origin key) are never recreated, only mutated.
//! - One bad record only ever costs that record.
//! - Every object finishes `before_loaded` before any `after_loaded` runs.
//! - After a load, a saved handle resolves to the object saved under that id
//!   or to nothing. Live objects sitting on a restored id are moved aside.

use crate::report::{LoadReport, RecordOutcome, RecordStatus, Rekey, SkipReason};
use keepsake_common::{ByteReader, ByteWriter, CodecError, OriginKey, PersistentId};
use keepsake_kernel::{IdError, LoadContext, MAX_ID, Persistable, World};
use std::collections::{HashMap, HashSet};

/// One entity record as it sits in a save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRecord<'a> {
    pub type_name: String,
    pub payload: &'a [u8],
    pub origin: Option<OriginKey>,
}

impl<'a> EntityRecord<'a> {
    pub fn encode(&self, w: &mut ByteWriter) -> Result<(), CodecError> {
        w.write_string(&self.type_name);
        w.write_prefixed(self.payload)?;
        write_origin(w, self.origin.as_ref());
        Ok(())
    }

    pub fn decode(r: &mut ByteReader<'a>) -> Result<Self, CodecError> {
        let type_name = r.read_string()?;
        let payload = r.read_prefixed()?;
        let origin = if r.read_bool()? {
            Some(OriginKey(r.read_string()?))
        } else {
            None
        };
        Ok(Self {
            type_name,
            payload,
            origin,
        })
    }

    /// Persistent id stored at the head of the payload.
    pub fn saved_id(&self) -> Result<PersistentId, CodecError> {
        ByteReader::new(self.payload).read_id()
    }
}

fn write_origin(w: &mut ByteWriter, origin: Option<&OriginKey>) {
    match origin {
        Some(key) => {
            w.write_bool(true);
            w.write_string(key.as_str());
        }
        None => w.write_bool(false),
    }
}

/// Counters gathered while writing the entity set.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct WriteStats {
    pub records: usize,
    pub excluded: usize,
    pub unwritable: usize,
}

/// Write the record count followed by one record per persisted object.
pub(crate) fn write_entities(world: &World, out: &mut ByteWriter) -> Result<WriteStats, CodecError> {
    let mut stats = WriteStats::default();
    let mut records = ByteWriter::new();

    for (id, entity) in world.iter() {
        if !entity.should_persist() {
            stats.excluded += 1;
            continue;
        }
        let type_name = entity.type_name();
        if !world.types().contains(type_name) {
            tracing::warn!(%id, type_name, "saving an object whose type is not registered; it will not load");
        }

        let mut record = ByteWriter::new();
        record.write_string(type_name);
        let payload = record.write_wrapped(|block| {
            block.write_id(id);
            entity.write_state(block)
        });
        if let Err(error) = payload {
            tracing::error!(%id, type_name, %error, "object state could not be written; left out of save");
            stats.unwritable += 1;
            continue;
        }
        write_origin(&mut record, entity.origin());

        records.write_raw(record.as_bytes());
        stats.records += 1;
    }

    let count = i32::try_from(stats.records)
        .map_err(|_| CodecError::invalid(format!("{} records exceed the i32 count", stats.records)))?;
    out.write_i32(count);
    out.write_raw(records.as_bytes());
    tracing::debug!(records = stats.records, excluded = stats.excluded, "entity set written");
    Ok(stats)
}

/// Records read from a save, before any of them is resolved.
#[derive(Debug, Default)]
pub(crate) struct DecodedRecords<'a> {
    pub declared: usize,
    pub records: Vec<EntityRecord<'a>>,
    pub truncated: bool,
}

/// Read the record count and every record that can be framed.
///
/// A record that cannot be framed leaves no way to find the next one, so
/// decoding stops there and the result is marked truncated.
pub(crate) fn decode_records<'a>(input: &mut ByteReader<'a>) -> DecodedRecords<'a> {
    let mut decoded = DecodedRecords::default();
    let count = match input.read_i32() {
        Ok(count) if count >= 0 => count as usize,
        Ok(count) => {
            tracing::error!(count, "negative entity record count");
            decoded.truncated = true;
            return decoded;
        }
        Err(error) => {
            tracing::error!(%error, "entity record count missing");
            decoded.truncated = true;
            return decoded;
        }
    };
    decoded.declared = count;

    for index in 0..count {
        match EntityRecord::decode(input) {
            Ok(record) => decoded.records.push(record),
            Err(error) => {
                tracing::error!(
                    record = index,
                    %error,
                    "entity record framing broken; remaining records abandoned"
                );
                decoded.truncated = true;
                break;
            }
        }
    }
    decoded
}

pub(crate) enum Target {
    /// A live map object, matched by origin key.
    Existing(PersistentId),
    /// A new object built from the record's type name.
    Fresh(Box<dyn Persistable>),
}

/// A record paired with the object it will be applied to.
pub(crate) struct Association<'a> {
    pub index: usize,
    pub type_name: String,
    pub payload: &'a [u8],
    pub target: Target,
}

/// Pass 1: find or build the target object of every record.
pub(crate) fn resolve<'a>(
    world: &World,
    records: Vec<EntityRecord<'a>>,
    outcomes: &mut Vec<RecordOutcome>,
) -> Vec<Association<'a>> {
    // Lowest id wins when two live objects share a key, as in `find_by_origin`.
    let mut by_origin: HashMap<&OriginKey, PersistentId> = HashMap::new();
    for (id, entity) in world.iter() {
        if let Some(key) = entity.origin() {
            by_origin.entry(key).or_insert(id);
        }
    }

    let mut claimed = HashSet::new();
    let mut associations = Vec::with_capacity(records.len());

    for (index, record) in records.into_iter().enumerate() {
        let target = match &record.origin {
            Some(key) => match by_origin.get(key).copied() {
                Some(id) if claimed.insert(id) => Ok(Target::Existing(id)),
                Some(_) => Err(SkipReason::DuplicateOrigin(key.clone())),
                None => Err(SkipReason::UnmatchedOrigin(key.clone())),
            },
            None => match world.types().resolve(&record.type_name) {
                Some(ty) => Ok(Target::Fresh(ty.create())),
                None => Err(SkipReason::UnknownType(record.type_name.clone())),
            },
        };

        match target {
            Ok(target) => associations.push(Association {
                index,
                type_name: record.type_name,
                payload: record.payload,
                target,
            }),
            Err(reason) => {
                tracing::warn!(record = index, type_name = %record.type_name, %reason, "entity record dropped");
                outcomes.push(RecordOutcome {
                    index,
                    type_name: record.type_name,
                    status: RecordStatus::Skipped(reason),
                });
            }
        }
    }
    associations
}

struct Staged<'a> {
    index: usize,
    type_name: String,
    payload: &'a [u8],
    entity: Box<dyn Persistable>,
    previous: Option<PersistentId>,
}

/// Pass 2: apply every payload to its target and put the target in the world.
///
/// Matched map objects are detached first so they can take back their saved
/// ids even when the map handed them different ones this session. A saved id
/// is only honoured if it is non-zero, issuable, not above the saved
/// watermark and not already claimed by an earlier record. Any other live
/// object still sitting on an honoured id is moved to a fresh one. Every
/// object that ends up off its saved id is listed in `report.rekeyed`.
///
/// The world's watermark must already be restored.
pub(crate) fn deserialize_into(
    world: &mut World,
    associations: Vec<Association<'_>>,
    report: &mut LoadReport,
) {
    let mut staged = Vec::with_capacity(associations.len());
    for Association {
        index,
        type_name,
        payload,
        target,
    } in associations
    {
        let (entity, previous) = match target {
            Target::Existing(id) => match world.despawn(id) {
                Some(entity) => (entity, Some(id)),
                None => continue,
            },
            Target::Fresh(entity) => (entity, None),
        };
        staged.push(Staged {
            index,
            type_name,
            payload,
            entity,
            previous,
        });
    }

    let mut applied = Vec::with_capacity(staged.len());
    let mut failed = Vec::new();
    for mut item in staged {
        let mut reader = ByteReader::new(item.payload);
        let result = reader
            .read_id()
            .and_then(|saved| item.entity.read_state(&mut reader).map(|()| saved));
        match result {
            Ok(saved) => applied.push((item, saved)),
            Err(error) => {
                tracing::error!(
                    record = item.index,
                    type_name = %item.type_name,
                    %error,
                    "entity payload could not be applied"
                );
                failed.push((item, error));
            }
        }
    }

    let watermark = report.watermark;
    let usable = |id: PersistentId| {
        id.0 != 0 && id.0 <= MAX_ID && watermark.is_none_or(|w| id.0 <= w)
    };
    let mut owners: HashMap<PersistentId, usize> = HashMap::new();
    for (item, saved) in &applied {
        if usable(*saved) {
            owners.entry(*saved).or_insert(item.index);
        }
    }
    if let Some(highest) = owners.keys().max() {
        if let Err(error) = world.restore_watermark(highest.0) {
            tracing::error!(%error, "saved ids could not be reserved");
        }
    }
    make_room(world, &mut owners, &mut report.rekeyed);

    for (item, saved) in applied {
        let wanted = (owners.get(&saved) == Some(&item.index)).then_some(saved);
        let previous = item.previous.filter(|id| !owners.contains_key(id));
        let status = match place(world, item.entity, wanted.into_iter().chain(previous)) {
            Ok(id) => {
                if id != saved {
                    tracing::warn!(
                        record = item.index,
                        type_name = %item.type_name,
                        %saved,
                        assigned = %id,
                        "saved id unavailable; object re-keyed"
                    );
                    report.rekeyed.push(Rekey {
                        type_name: item.type_name.clone(),
                        from: saved,
                        to: id,
                        record: Some(item.index),
                    });
                }
                match item.previous {
                    Some(_) => RecordStatus::Matched(id),
                    None => RecordStatus::Created(id),
                }
            }
            Err(error) => {
                tracing::error!(
                    record = item.index,
                    type_name = %item.type_name,
                    %saved,
                    %error,
                    "object could not be placed"
                );
                RecordStatus::Skipped(SkipReason::NoFreeId(saved))
            }
        };
        report.records.push(RecordOutcome {
            index: item.index,
            type_name: item.type_name,
            status,
        });
    }

    for (item, error) in failed {
        // A map object keeps existing even when its state is bad.
        if let Some(previous) = item.previous {
            let own = Some(previous).filter(|id| !owners.contains_key(id));
            match place(world, item.entity, own) {
                Ok(id) if id != previous => report.rekeyed.push(Rekey {
                    type_name: item.type_name.clone(),
                    from: previous,
                    to: id,
                    record: Some(item.index),
                }),
                Ok(_) => {}
                Err(error) => {
                    tracing::error!(
                        record = item.index,
                        %previous,
                        %error,
                        "map object lost; no id to put it back under"
                    );
                }
            }
        }
        report.records.push(RecordOutcome {
            index: item.index,
            type_name: item.type_name,
            status: RecordStatus::Skipped(SkipReason::MalformedPayload(error)),
        });
    }
}

/// Move live objects off every saved id in `owners`.
///
/// An id whose occupant cannot be moved is withdrawn from `owners`; its
/// record is placed elsewhere.
fn make_room(
    world: &mut World,
    owners: &mut HashMap<PersistentId, usize>,
    rekeyed: &mut Vec<Rekey>,
) {
    let mut occupied: Vec<PersistentId> = owners
        .keys()
        .copied()
        .filter(|&id| world.contains(id))
        .collect();
    occupied.sort();
    for from in occupied {
        let type_name = world.get(from).map(|e| e.type_name().to_owned()).unwrap_or_default();
        match world.rekey(from) {
            Ok(Some(to)) => {
                tracing::warn!(%from, %to, %type_name, "live object moved off a restored id");
                rekeyed.push(Rekey {
                    type_name,
                    from,
                    to,
                    record: None,
                });
            }
            Ok(None) => {}
            Err(error) => {
                tracing::error!(
                    %from,
                    %type_name,
                    %error,
                    "live object could not be moved; saved id withdrawn"
                );
                owners.remove(&from);
            }
        }
    }
}

/// Insert `entity` under the first free candidate, else under a fresh id.
fn place(
    world: &mut World,
    mut entity: Box<dyn Persistable>,
    candidates: impl IntoIterator<Item = PersistentId>,
) -> Result<PersistentId, IdError> {
    for candidate in candidates {
        match world.insert_with_id(candidate, entity) {
            Ok(()) => return Ok(candidate),
            Err(back) => entity = back,
        }
    }
    let id = world.generate_id()?;
    world.insert_with_id(id, entity).map_err(|_| IdError::Taken(id))?;
    Ok(id)
}

/// First notification sweep over every live object.
pub(crate) fn sweep_before_loaded(world: &mut World) {
    for id in world.entity_ids() {
        world.with_detached(id, |entity, world| {
            entity.before_loaded(&LoadContext { id, world });
        });
    }
}

/// Second notification sweep; starts only after the first has finished.
pub(crate) fn sweep_after_loaded(world: &mut World) {
    for id in world.entity_ids() {
        world.with_detached(id, |entity, world| {
            entity.after_loaded(&LoadContext { id, world });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Prop, Walker, map_world};

    #[test]
    fn record_with_origin_round_trips() {
        let record = EntityRecord {
            type_name: "prop".into(),
            payload: &[1, 2, 3],
            origin: Some(OriginKey::new("crate_07")),
        };
        let mut w = ByteWriter::new();
        record.encode(&mut w).unwrap();

        let bytes = w.into_bytes();
        let mut r = ByteReader::new(&bytes);
        assert_eq!(EntityRecord::decode(&mut r).unwrap(), record);
        assert!(r.is_empty());
    }

    #[test]
    fn record_without_origin_has_no_key_field() {
        let record = EntityRecord {
            type_name: "a".into(),
            payload: &[],
            origin: None,
        };
        let mut w = ByteWriter::new();
        record.encode(&mut w).unwrap();
        // name (1 + 1) + payload length (4) + origin flag (1)
        assert_eq!(w.len(), 7);
    }

    #[test]
    fn saved_id_reads_payload_head() {
        let mut payload = ByteWriter::new();
        payload.write_id(PersistentId(12));
        payload.write_u32(99);
        let record = EntityRecord {
            type_name: "prop".into(),
            payload: payload.as_bytes(),
            origin: None,
        };
        assert_eq!(record.saved_id().unwrap(), PersistentId(12));
    }

    #[test]
    fn negative_count_decodes_nothing() {
        let mut w = ByteWriter::new();
        w.write_i32(-1);
        let bytes = w.into_bytes();
        let decoded = decode_records(&mut ByteReader::new(&bytes));
        assert!(decoded.truncated);
        assert!(decoded.records.is_empty());
    }

    #[test]
    fn broken_record_keeps_earlier_ones() {
        let mut w = ByteWriter::new();
        w.write_i32(3);
        EntityRecord {
            type_name: "prop".into(),
            payload: &[0; 8],
            origin: None,
        }
        .encode(&mut w)
        .unwrap();
        // Second record is cut off inside its payload length.
        w.write_string("prop");
        w.write_u8(1);
        let bytes = w.into_bytes();

        let decoded = decode_records(&mut ByteReader::new(&bytes));
        assert_eq!(decoded.declared, 3);
        assert_eq!(decoded.records.len(), 1);
        assert!(decoded.truncated);
    }

    #[test]
    fn resolve_matches_every_origin_in_a_large_map() {
        let keys: Vec<String> = (0..2000).map(|i| format!("prop_{i}")).collect();
        let key_refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let mut world = map_world(&key_refs);
        // A second live object under an existing key loses to the lower id.
        world.spawn(Prop::placed("prop_5")).unwrap();

        let records: Vec<EntityRecord<'_>> = keys
            .iter()
            .rev()
            .map(|key| EntityRecord {
                type_name: "prop".into(),
                payload: &[],
                origin: Some(OriginKey::new(key.as_str())),
            })
            .collect();
        let mut outcomes = Vec::new();
        let associations = resolve(&world, records, &mut outcomes);

        assert!(outcomes.is_empty());
        assert_eq!(associations.len(), 2000);
        for association in &associations {
            let Target::Existing(id) = association.target else {
                panic!("record {} was not matched", association.index);
            };
            let expected = world.find_by_origin(world.get(id).unwrap().origin().unwrap());
            assert_eq!(Some(id), expected);
        }
        let Target::Existing(dup) = associations[1994].target else {
            panic!("prop_5 was not matched");
        };
        assert_eq!(dup, PersistentId(6));
    }

    #[test]
    fn place_falls_back_to_a_fresh_id_when_every_candidate_is_taken() {
        let mut world = map_world(&["a", "b"]);
        let id = place(
            &mut world,
            Box::new(Walker::named("late", 1)),
            [PersistentId(1), PersistentId(2), PersistentId(0)],
        )
        .unwrap();

        assert_eq!(id, PersistentId(3));
        assert_eq!(world.get_as::<Walker>(id).unwrap().name, "late");
        assert_eq!(world.entity_count(), 3);
    }

    #[test]
    fn place_reports_an_exhausted_allocator() {
        let mut world = map_world(&[]);
        world
            .insert_with_id(PersistentId(MAX_ID), Box::new(Prop::placed("last")))
            .unwrap_or_else(|_| panic!("MAX_ID should be free"));

        let result = place(
            &mut world,
            Box::new(Walker::named("overflow", 1)),
            [PersistentId(MAX_ID)],
        );

        assert_eq!(result, Err(IdError::Exhausted(MAX_ID)));
        assert_eq!(world.entity_ids(), vec![PersistentId(MAX_ID)]);
        assert_eq!(world.ids().watermark(), MAX_ID);
    }
}
