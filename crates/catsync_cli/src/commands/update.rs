//! Update command implementation.

use super::{parse_assignment, parse_query, CliResult, StoreOptions};
use catsync_engine::{FieldOp, FieldUpdate, FieldUpdateEngine};
use catsync_store::{Collection, Predicate};

/// Arguments of the update command.
#[derive(Debug, Clone, Default)]
pub struct UpdateArgs {
    /// Collection name.
    pub collection: String,
    /// Query selecting the records.
    pub query: String,
    /// `field=value` replacements.
    pub set: Vec<String>,
    /// `field=value` appends.
    pub add: Vec<String>,
    /// Fields to remove.
    pub remove: Vec<String>,
    /// `destination=source` copies.
    pub copy: Vec<String>,
    /// `old=new` renames.
    pub rename: Vec<String>,
    /// Cascade to files and aggregations.
    pub cascade: bool,
}

/// Collects `field=value` assignments, keeping repeated fields together.
fn grouped(assignments: &[String]) -> CliResult<Vec<(String, Vec<String>)>> {
    let mut groups: Vec<(String, Vec<String>)> = Vec::new();
    for text in assignments {
        let (field, value) = parse_assignment(text)?;
        match groups.iter_mut().find(|(f, _)| *f == field) {
            Some((_, values)) => values.push(value),
            None => groups.push((field, vec![value])),
        }
    }
    Ok(groups)
}

/// Builds the updates to apply in order.
///
/// A rename copies in the first update and removes the old field in a second
/// one, so the copy is read before the source disappears.
pub fn build_updates(
    args: &UpdateArgs,
    collection: Collection,
    predicate: &Predicate,
) -> CliResult<Vec<FieldUpdate>> {
    let mut first = FieldUpdate::new(collection, predicate.clone());
    for (field, values) in grouped(&args.set)? {
        first = first.with_op(FieldOp::set(field, values));
    }
    for (field, values) in grouped(&args.add)? {
        first = first.with_op(FieldOp::add(field, values));
    }
    for field in &args.remove {
        first = first.with_op(FieldOp::remove(field.trim()));
    }
    for text in &args.copy {
        let (destination, source) = parse_assignment(text)?;
        first = first.with_op(FieldOp::copy_from(destination, source.trim()));
    }

    let mut second = FieldUpdate::new(collection, predicate.clone());
    for text in &args.rename {
        let (old, new) = parse_assignment(text)?;
        if new.trim().is_empty() {
            return Err(format!("rename `{text}` has no new name").into());
        }
        first = first.with_op(FieldOp::copy_from(new.trim(), old.clone()));
        second = second.with_op(FieldOp::remove(old));
    }

    let updates: Vec<FieldUpdate> = [first, second]
        .into_iter()
        .filter(|u| !u.ops.is_empty())
        .collect();
    if updates.is_empty() {
        return Err("no field operation given".into());
    }
    Ok(updates)
}

/// Runs the update command.
pub fn run(options: &StoreOptions, url: &str, args: &UpdateArgs) -> CliResult<()> {
    let collection: Collection = args.collection.parse()?;
    let predicate = parse_query(&args.query)?;
    let updates = build_updates(args, collection, &predicate)?;
    if args.cascade && collection != Collection::Datasets {
        return Err("--cascade only applies to datasets".into());
    }
    let store = options.connect(url)?;
    let engine = FieldUpdateEngine::new(&options.sync_config());

    for update in &updates {
        if args.cascade {
            let ids = engine.apply_cascading(&store, update)?;
            println!(
                "Updated {} datasets and their files and aggregations",
                ids.len()
            );
        } else {
            let count = engine.apply(&store, update)?;
            println!("Updated {count} {collection} records");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use catsync_engine::{FieldAction, SyncConfig};
    use catsync_store::{MemoryStore, Record};

    fn args() -> UpdateArgs {
        UpdateArgs {
            collection: "datasets".to_string(),
            query: "project:CMIP6".to_string(),
            ..UpdateArgs::default()
        }
    }

    #[test]
    fn repeated_sets_become_one_multi_valued_set() {
        let a = UpdateArgs {
            set: vec!["realm=atmos".to_string(), "realm=ocean".to_string()],
            add: vec!["tags=fixed".to_string()],
            remove: vec!["obsolete".to_string()],
            ..args()
        };
        let updates = build_updates(&a, Collection::Datasets, &Predicate::all()).unwrap();
        assert_eq!(updates.len(), 1);
        let ops = &updates[0].ops;
        assert_eq!(ops[0], FieldOp::set("realm", ["atmos", "ocean"]));
        assert_eq!(ops[1], FieldOp::add("tags", ["fixed"]));
        assert_eq!(ops[2].action, FieldAction::Remove);
    }

    #[test]
    fn rename_is_copy_then_remove() {
        let a = UpdateArgs {
            rename: vec!["grid_label=grid".to_string()],
            ..args()
        };
        let updates = build_updates(&a, Collection::Files, &Predicate::all()).unwrap();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].ops, vec![FieldOp::copy_from("grid", "grid_label")]);
        assert_eq!(updates[1].ops, vec![FieldOp::remove("grid_label")]);
    }

    #[test]
    fn rejects_empty_and_malformed_operations() {
        assert!(build_updates(&args(), Collection::Datasets, &Predicate::all()).is_err());
        let a = UpdateArgs {
            set: vec!["realm".to_string()],
            ..args()
        };
        assert!(build_updates(&a, Collection::Datasets, &Predicate::all()).is_err());
        let b = UpdateArgs {
            rename: vec!["grid_label=".to_string()],
            ..args()
        };
        assert!(build_updates(&b, Collection::Datasets, &Predicate::all()).is_err());
    }

    #[test]
    fn rename_applies_against_a_store() {
        let store = MemoryStore::new("local");
        store.insert(
            Collection::Files,
            [Record::new().with("id", "f1").with("grid_label", "gn")],
        );
        let a = UpdateArgs {
            rename: vec!["grid_label=grid".to_string()],
            ..args()
        };
        let engine = FieldUpdateEngine::new(&SyncConfig::new());
        for update in build_updates(&a, Collection::Files, &Predicate::all()).unwrap() {
            engine.apply(&store, &update).unwrap();
        }
        let record = store.get(Collection::Files, "f1").unwrap();
        assert_eq!(record.first_text("grid").as_deref(), Some("gn"));
        assert!(!record.contains("grid_label"));
        assert_eq!(store.calls().update, 2);
    }
}
