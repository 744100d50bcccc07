//! Query executor.
//!
//! Walks the operation list of a [`Query`] against the store. Every field
//! read is recorded as an exact dependency; every find and inherit records
//! a containment relation and the marker describing it. Node markers are
//! derived from the exact reads once execution finishes.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::pin::Pin;

use serde_json::{Map, Value};

use super::{CompiledFilter, ContainsDep, DependencyTree, Filter, Operation, PARENTS_FIELD, Query, QueryError, TYPE_FIELD};
use crate::core::{EntityId, FieldPath, Origin};
use crate::store::{FindRequest, GraphStore, Marker, MarkerId, Schema, Traversal};

/// Output of one query execution.
#[derive(Debug, Clone, Default)]
pub struct Execution {
    pub payload: Value,
    pub deps: DependencyTree,
    pub markers: BTreeMap<MarkerId, Marker>,
}

/// Execute `query` against `store`.
pub async fn execute<S: GraphStore>(store: &S, query: &Query) -> Result<Execution, QueryError> {
    let mut executor = Executor {
        store,
        origin: &query.origin,
        deps: DependencyTree::new(),
        markers: BTreeMap::new(),
        schema: None,
    };
    let payload = executor.run(&query.id, &query.operations).await?;

    let Executor {
        deps, mut markers, ..
    } = executor;
    for (id, fields) in &deps.ids {
        let marker = Marker::new(Traversal::Node, id.clone(), fields.iter().cloned(), None);
        markers.insert(marker.id(), marker);
    }

    Ok(Execution {
        payload: Value::Object(payload),
        deps,
        markers,
    })
}

type RunFuture<'a> = Pin<Box<dyn Future<Output = Result<Map<String, Value>, QueryError>> + Send + 'a>>;

struct Executor<'a, S> {
    store: &'a S,
    origin: &'a Origin,
    deps: DependencyTree,
    markers: BTreeMap<MarkerId, Marker>,
    schema: Option<Schema>,
}

impl<'a, S: GraphStore> Executor<'a, S> {
    /// Run `operations` on entity `id`, producing one result object.
    fn run<'b>(&'b mut self, id: &'b EntityId, operations: &'b [Operation]) -> RunFuture<'b> {
        Box::pin(async move {
            let mut out = Map::new();
            for operation in operations {
                if let Some(value) = self.operation(id, operation).await? {
                    out.insert(operation.field().to_string(), value);
                }
            }
            Ok(out)
        })
    }

    async fn operation(&mut self, id: &EntityId, operation: &Operation) -> Result<Option<Value>, QueryError> {
        match operation {
            Operation::Value { value, .. } => Ok(Some(value.clone())),

            Operation::Field {
                field,
                source,
                default,
            } => {
                let own = [FieldPath::new(field)];
                let sources = if source.is_empty() { &own[..] } else { &source[..] };
                let value = self.first_of(id, sources).await?;
                Ok(value.or_else(|| default.clone()))
            }

            Operation::Find {
                root,
                traverse,
                filter,
                sort,
                offset,
                limit,
                single,
                operations,
                ..
            } => {
                let root = root.clone().unwrap_or_else(|| id.clone());
                let compiled = filter.as_ref().map(Filter::compile);
                let type_prefix = match filter.as_ref().and_then(Filter::type_name) {
                    Some(name) => self.schema().await?.prefix_of(name).map(str::to_string),
                    None => None,
                };

                let mut fields: BTreeSet<FieldPath> = compiled
                    .iter()
                    .flat_map(|f| f.fields().cloned())
                    .collect();
                fields.insert(FieldPath::new(PARENTS_FIELD));
                if let Some(sort) = sort {
                    fields.insert(sort.field.clone());
                }
                self.watch(&root, *traverse, type_prefix, fields, compiled.clone());

                let request = FindRequest {
                    root,
                    traversal: *traverse,
                    filter: compiled,
                    sort: sort.clone(),
                    offset: *offset,
                    limit: if *single { Some(1) } else { *limit },
                };
                let ids = self.store.find(self.origin, request).await?;

                let mut items = Vec::with_capacity(ids.len());
                for found in &ids {
                    items.push(Value::Object(self.run(found, operations).await?));
                }
                if *single {
                    Ok(Some(items.into_iter().next().unwrap_or(Value::Null)))
                } else {
                    Ok(Some(Value::Array(items)))
                }
            }

            Operation::Inherit { source, types, .. } => {
                if let Some(value) = self.first_of(id, source).await? {
                    return Ok(Some(value));
                }

                let filter = (!types.is_empty()).then(|| Filter::Or {
                    filters: types
                        .iter()
                        .map(|name| Filter::Eq {
                            field: FieldPath::new(TYPE_FIELD),
                            value: Value::String(name.clone()),
                        })
                        .collect(),
                });
                let compiled = filter.as_ref().map(Filter::compile);

                let mut fields: BTreeSet<FieldPath> = source.iter().cloned().collect();
                fields.insert(FieldPath::new(PARENTS_FIELD));
                if compiled.is_some() {
                    fields.insert(FieldPath::new(TYPE_FIELD));
                }
                self.watch(id, Traversal::Ancestors, None, fields, compiled.clone());

                let mut request = FindRequest::new(id.clone(), Traversal::Ancestors);
                request.filter = compiled;
                let ancestors = self.store.find(self.origin, request).await?;
                for ancestor in &ancestors {
                    if let Some(value) = self.first_of(ancestor, source).await? {
                        return Ok(Some(value));
                    }
                }
                Ok(None)
            }

            Operation::Nested {
                id: target,
                operations,
                ..
            } => {
                let target = target.as_ref().unwrap_or(id);
                Ok(Some(Value::Object(self.run(target, operations).await?)))
            }

            Operation::Array { items, .. } => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    let target = item.id.as_ref().unwrap_or(id);
                    out.push(Value::Object(self.run(target, &item.operations).await?));
                }
                Ok(Some(Value::Array(out)))
            }
        }
    }

    /// First non-null value among `sources` on `id`, recording each read.
    async fn first_of(&mut self, id: &EntityId, sources: &[FieldPath]) -> Result<Option<Value>, QueryError> {
        for source in sources {
            self.deps.record_read(id, source);
            if let Some(value) = self.store.get_field(self.origin, id, source).await?
                && !value.is_null()
            {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    fn watch(
        &mut self,
        root: &EntityId,
        traversal: Traversal,
        type_prefix: Option<String>,
        fields: BTreeSet<FieldPath>,
        filter: Option<CompiledFilter>,
    ) {
        let marker = Marker::new(traversal, root.clone(), fields.iter().cloned(), filter);
        self.markers.insert(marker.id(), marker);
        self.deps.record_contains(ContainsDep {
            root: root.clone(),
            traversal,
            type_prefix,
            fields,
        });
    }

    async fn schema(&mut self) -> Result<&Schema, QueryError> {
        if self.schema.is_none() {
            self.schema = Some(self.store.schema(self.origin).await?);
        }
        Ok(self.schema.get_or_insert_with(Schema::default))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::SubQuery;
    use crate::store::MemoryStore;
    use serde_json::json;

    const O: &str = "default";

    fn league() -> MemoryStore {
        let store = MemoryStore::new();
        store.update_schema(O, "match", "ma");
        store.create(O, "ro", &[], json!({"type": "root", "title": "League", "color": "red"}));
        store.create(O, "ma1", &["ro"], json!({"type": "match", "name": "m1"}));
        store.create(O, "te1", &["ro"], json!({"type": "team", "name": "t1"}));
        store.create(O, "ma2", &["ro"], json!({"type": "match", "name": "m2"}));
        store.create(O, "pl1", &["te1"], json!({"type": "player", "name": "p1"}));
        store
    }

    fn matches_query() -> Query {
        Query::new("ro").with(Operation::find(
            "items",
            Traversal::Children,
            Some(Filter::Eq {
                field: TYPE_FIELD.into(),
                value: json!("match"),
            }),
            vec![Operation::field_of("name")],
        ))
    }

    #[tokio::test]
    async fn test_find_payload_and_dependencies() {
        let store = league();
        let execution = execute(&store, &matches_query()).await.unwrap();

        assert_eq!(
            execution.payload,
            json!({"items": [{"name": "m1"}, {"name": "m2"}]})
        );
        assert!(execution.deps.ids[&EntityId::new("ma1")].contains(&FieldPath::new("name")));

        let contains: Vec<_> = execution.deps.contains.iter().collect();
        assert_eq!(contains.len(), 1);
        assert_eq!(contains[0].root.as_str(), "ro");
        assert_eq!(contains[0].type_prefix.as_deref(), Some("ma"));
        assert!(contains[0].fields.contains(&FieldPath::new(TYPE_FIELD)));
        assert!(contains[0].fields.contains(&FieldPath::new(PARENTS_FIELD)));

        // One find marker plus a node marker per matched entity
        assert_eq!(execution.markers.len(), 3);
    }

    #[tokio::test]
    async fn test_deterministic_dependencies() {
        let store = league();
        let a = execute(&store, &matches_query()).await.unwrap();
        let b = execute(&store, &matches_query()).await.unwrap();
        assert_eq!(a.deps.version(), b.deps.version());
        assert_eq!(
            a.markers.keys().collect::<Vec<_>>(),
            b.markers.keys().collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn test_field_fallbacks_and_default() {
        let store = league();
        let query = Query::new("ma1")
            .with(Operation::Field {
                field: "label".into(),
                source: vec!["title".into(), "name".into()],
                default: None,
            })
            .with(Operation::Field {
                field: "score".into(),
                source: vec![],
                default: Some(json!(0)),
            })
            .with(Operation::Value {
                field: "kind".into(),
                value: json!("fixture"),
            });
        let execution = execute(&store, &query).await.unwrap();
        assert_eq!(
            execution.payload,
            json!({"label": "m1", "score": 0, "kind": "fixture"})
        );
        let read = &execution.deps.ids[&EntityId::new("ma1")];
        assert!(read.contains(&FieldPath::new("title")));
        assert!(read.contains(&FieldPath::new("name")));
        assert!(read.contains(&FieldPath::new("score")));
    }

    #[tokio::test]
    async fn test_inherit_walks_ancestors() {
        let store = league();
        let query = Query::new("pl1").with(Operation::Inherit {
            field: "color".into(),
            source: vec!["color".into()],
            types: vec![],
        });
        let execution = execute(&store, &query).await.unwrap();
        assert_eq!(execution.payload, json!({"color": "red"}));
        assert!(execution.deps.ids.contains_key(&EntityId::new("te1")));
        assert!(execution.deps.ids.contains_key(&EntityId::new("ro")));
        assert!(
            execution
                .deps
                .contains
                .iter()
                .any(|dep| dep.traversal == Traversal::Ancestors && dep.root.as_str() == "pl1")
        );
    }

    #[tokio::test]
    async fn test_inherit_restricted_to_types() {
        let store = league();
        store.set(O, "te1", "color", json!("blue")).unwrap();
        let query = Query::new("pl1").with(Operation::Inherit {
            field: "color".into(),
            source: vec!["color".into()],
            types: vec!["root".into()],
        });
        let execution = execute(&store, &query).await.unwrap();
        assert_eq!(execution.payload, json!({"color": "red"}));
    }

    #[tokio::test]
    async fn test_nested_array_and_single() {
        let store = league();
        let query = Query::new("ro")
            .with(Operation::Nested {
                field: "meta".into(),
                id: None,
                operations: vec![Operation::field_of("title")],
            })
            .with(Operation::Array {
                field: "pair".into(),
                items: vec![
                    SubQuery {
                        id: Some("ma1".into()),
                        operations: vec![Operation::field_of("name")],
                    },
                    SubQuery {
                        id: Some("te1".into()),
                        operations: vec![Operation::field_of("name")],
                    },
                ],
            })
            .with(Operation::Find {
                field: "first".into(),
                root: None,
                traverse: Traversal::Descendants,
                filter: Some(Filter::Eq {
                    field: TYPE_FIELD.into(),
                    value: json!("player"),
                }),
                sort: None,
                offset: 0,
                limit: None,
                single: true,
                operations: vec![Operation::field_of("name")],
            });
        let execution = execute(&store, &query).await.unwrap();
        assert_eq!(
            execution.payload,
            json!({
                "meta": {"title": "League"},
                "pair": [{"name": "m1"}, {"name": "t1"}],
                "first": {"name": "p1"}
            })
        );
    }

    #[tokio::test]
    async fn test_missing_root_yields_empty_object() {
        let store = league();
        let query = Query::new("zz1").with(Operation::field_of("name"));
        let execution = execute(&store, &query).await.unwrap();
        assert_eq!(execution.payload, json!({}));
        assert!(execution.deps.ids.contains_key(&EntityId::new("zz1")));
    }
}
