//! Schemas and a scripted executor shared by unit tests.

use crate::error::TransportError;
use crate::record::Row;
use crate::schema::Schema;
use crate::service::Executor;
use crate::sql::Statement;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;

const THING: &str = r#"{
    "enums": [{"name": "Category", "values": ["Sport", "Fashion"]}],
    "models": [
        {
            "name": "Thing",
            "fields": [
                {"name": "id", "type": "id", "primaryKey": true},
                {"name": "name", "type": "text"},
                {"name": "first", "type": "text"},
                {"name": "second", "type": "number"},
                {"name": "views", "type": "number", "default": 0},
                {"name": "isActive", "type": "boolean"},
                {"name": "code", "type": "text", "optional": true},
                {"name": "category", "type": {"enum": "Category"}},
                {"name": "createdAt", "type": "timestamp"},
                {"name": "parent", "type": {"model": "Parent"}, "foreignKeyFieldName": "parentId", "optional": true},
                {"name": "parentId", "type": "id", "optional": true},
                {"name": "repeatedThings", "type": {"model": "RepeatedThing"}, "repeated": true},
                {"name": "profile", "type": {"model": "Profile"}, "optional": true}
            ],
            "actions": [
                {"name": "getThing", "type": "get", "inputs": [
                    {"name": "id", "target": ["id"], "behaviour": "implicit", "mode": "read"}
                ]},
                {"name": "listThings", "type": "list",
                    "inputs": [
                        {"name": "name", "target": ["name"], "behaviour": "implicit", "mode": "read", "optional": true},
                        {"name": "views", "target": ["views"], "behaviour": "implicit", "mode": "read", "optional": true},
                        {"name": "parentName", "target": ["parent", "name"], "behaviour": "implicit", "mode": "read", "optional": true}
                    ],
                    "orderBy": [{"field": "name", "direction": "desc"}],
                    "sortable": ["name", "views"]
                },
                {"name": "createThing", "type": "create", "inputs": [
                    {"name": "name", "target": ["name"], "behaviour": "implicit", "mode": "write"},
                    {"name": "views", "target": ["views"], "behaviour": "implicit", "mode": "write", "optional": true},
                    {"name": "category", "target": ["category"], "behaviour": "implicit", "mode": "write", "optional": true},
                    {"name": "parentId", "target": ["parent", "id"], "behaviour": "implicit", "mode": "write", "optional": true},
                    {"name": "parentName", "target": ["parent", "name"], "behaviour": "implicit", "mode": "write", "optional": true}
                ]},
                {"name": "updateThing", "type": "update", "inputs": [
                    {"name": "id", "target": ["id"], "behaviour": "implicit", "mode": "read"},
                    {"name": "name", "target": ["name"], "behaviour": "implicit", "mode": "write", "optional": true},
                    {"name": "views", "target": ["views"], "behaviour": "implicit", "mode": "write", "optional": true}
                ]},
                {"name": "deleteThing", "type": "delete", "inputs": [
                    {"name": "id", "target": ["id"], "behaviour": "implicit", "mode": "read"}
                ]}
            ]
        },
        {
            "name": "Parent",
            "fields": [
                {"name": "id", "type": "id", "primaryKey": true},
                {"name": "name", "type": "text"},
                {"name": "isActive", "type": "boolean"}
            ]
        },
        {
            "name": "Profile",
            "fields": [
                {"name": "id", "type": "id", "primaryKey": true},
                {"name": "bio", "type": "text"},
                {"name": "thing", "type": {"model": "Thing"}, "foreignKeyFieldName": "thingId"},
                {"name": "thingId", "type": "id"}
            ]
        },
        {
            "name": "RepeatedThing",
            "fields": [
                {"name": "id", "type": "id", "primaryKey": true},
                {"name": "name", "type": "text"},
                {"name": "thing", "type": {"model": "Thing"}, "foreignKeyFieldName": "thingId"},
                {"name": "thingId", "type": "id"}
            ]
        }
    ]
}"#;

const SHOP: &str = r#"{
    "models": [
        {
            "name": "Person",
            "fields": [
                {"name": "id", "type": "id", "primaryKey": true},
                {"name": "name", "type": "text"},
                {"name": "age", "type": "number"}
            ]
        },
        {
            "name": "Order",
            "fields": [
                {"name": "id", "type": "id", "primaryKey": true},
                {"name": "items", "type": {"model": "OrderItem"}, "repeated": true}
            ],
            "actions": [
                {"name": "createOrder", "type": "create", "inputs": [
                    {"name": "itemsQuantity", "target": ["items", "quantity"], "behaviour": "implicit", "mode": "write"},
                    {"name": "itemsProductName", "target": ["items", "product", "name"], "behaviour": "implicit", "mode": "write"}
                ]}
            ]
        },
        {
            "name": "OrderItem",
            "fields": [
                {"name": "id", "type": "id", "primaryKey": true},
                {"name": "quantity", "type": "number"},
                {"name": "order", "type": {"model": "Order"}, "foreignKeyFieldName": "orderId"},
                {"name": "orderId", "type": "id"},
                {"name": "product", "type": {"model": "Product"}, "foreignKeyFieldName": "productId"},
                {"name": "productId", "type": "id"}
            ]
        },
        {
            "name": "Product",
            "fields": [
                {"name": "id", "type": "id", "primaryKey": true},
                {"name": "name", "type": "text"}
            ]
        }
    ]
}"#;

pub fn thing_schema() -> Schema {
    Schema::from_json(THING).expect("thing schema")
}

pub fn shop_schema() -> Schema {
    Schema::from_json(SHOP).expect("shop schema")
}

pub fn row(value: Value) -> Row {
    value.as_object().cloned().expect("row must be an object")
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Query(Statement),
    Execute(Statement),
    Begin,
    Commit,
    Rollback,
}

/// Answers queries from a script, in order, and records every call. Queries beyond the
/// script return no rows.
#[derive(Default)]
pub struct ScriptedExecutor {
    responses: VecDeque<Result<Vec<Row>, String>>,
    pub calls: Vec<Call>,
}

impl ScriptedExecutor {
    pub fn returning(mut self, rows: Vec<Row>) -> Self {
        self.responses.push_back(Ok(rows));
        self
    }

    pub fn failing(mut self, message: &str) -> Self {
        self.responses.push_back(Err(message.to_string()));
        self
    }

    pub fn queries(&self) -> Vec<&Statement> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                Call::Query(s) | Call::Execute(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    fn next(&mut self) -> Result<Vec<Row>, TransportError> {
        match self.responses.pop_front() {
            Some(Ok(rows)) => Ok(rows),
            Some(Err(message)) => Err(TransportError::Database(sqlx::Error::Protocol(message))),
            None => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    async fn execute_query(&mut self, statement: &Statement) -> Result<Vec<Row>, TransportError> {
        self.calls.push(Call::Query(statement.clone()));
        self.next()
    }

    async fn execute_statement(&mut self, statement: &Statement) -> Result<u64, TransportError> {
        self.calls.push(Call::Execute(statement.clone()));
        self.next().map(|rows| rows.len() as u64)
    }

    async fn begin(&mut self) -> Result<(), TransportError> {
        self.calls.push(Call::Begin);
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), TransportError> {
        self.calls.push(Call::Commit);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), TransportError> {
        self.calls.push(Call::Rollback);
        Ok(())
    }
}
