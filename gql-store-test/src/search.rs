//! A union field with arguments.

use crate::scalars;
use gql_store::{CacheObject, FieldSelector};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "__typename")]
pub enum SearchResult {
    Dog { id: String, name: String },
    Person { id: String, name: String }
}

pub fn member_selection(typename: &str) -> Vec<FieldSelector> {
    match typename {
        "Dog" | "Person" => scalars(&["__typename", "id", "name"]),
        _ => scalars(&["__typename"])
    }
}

pub fn variables() -> Value {
    json!({ "text": "R" })
}

/// `query Search($text: String!) { search(text: $text) { __typename ... on Dog { id name } ... on Person { id name } } }`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseData {
    pub search: Vec<SearchResult>
}

impl CacheObject for ResponseData {
    fn selection() -> Vec<FieldSelector> {
        vec![FieldSelector::union("search", member_selection).with_args(&variables())]
    }
}

lazy_static! {
    pub static ref RESPONSE: Value = json!({
        "search": [
            { "__typename": "Dog", "id": "1", "name": "Rex" },
            { "__typename": "Person", "id": "7", "name": "Rita" }
        ]
    });
}
