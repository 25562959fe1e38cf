use crate::scalars;
use gql_store::{CacheObject, FieldSelector};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Dog {
    #[serde(rename = "__typename")]
    pub typename: String,
    pub id: String,
    pub name: String
}

impl Dog {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            typename: "Dog".to_string(),
            id: id.to_string(),
            name: name.to_string()
        }
    }
}

impl CacheObject for Dog {
    fn selection() -> Vec<FieldSelector> {
        scalars(&["__typename", "id", "name"])
    }
}

/// `query GetDog($id: ID!) { dog(id: $id) { __typename id name } }`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseData {
    pub dog: Option<Dog>
}

impl CacheObject for ResponseData {
    fn selection() -> Vec<FieldSelector> {
        vec![FieldSelector::object("dog", Dog::selection())]
    }
}

pub fn dog_json(id: &str, name: &str) -> Value {
    json!({ "__typename": "Dog", "id": id, "name": name })
}

pub fn response(id: &str, name: &str) -> Value {
    json!({ "dog": dog_json(id, name) })
}

lazy_static! {
    pub static ref REX: Value = dog_json("1", "Rex");
}
