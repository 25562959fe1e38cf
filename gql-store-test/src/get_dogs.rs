//! Dogs with owners. Owners are entities, their addresses have no id and end up inlined into
//! the owner's record.

use crate::scalars;
use gql_store::{CacheObject, FieldSelector};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub street: String,
    pub city: String
}

impl CacheObject for Address {
    fn selection() -> Vec<FieldSelector> {
        scalars(&["street", "city"])
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Owner {
    #[serde(rename = "__typename")]
    pub typename: String,
    pub id: String,
    pub name: String,
    pub address: Option<Address>
}

impl CacheObject for Owner {
    fn selection() -> Vec<FieldSelector> {
        let mut selection = scalars(&["__typename", "id", "name"]);
        selection.push(FieldSelector::object("address", Address::selection()));
        selection
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DogWithOwner {
    #[serde(rename = "__typename")]
    pub typename: String,
    pub id: String,
    pub name: String,
    pub owner: Option<Owner>
}

impl CacheObject for DogWithOwner {
    fn selection() -> Vec<FieldSelector> {
        let mut selection = scalars(&["__typename", "id", "name"]);
        selection.push(FieldSelector::object("owner", Owner::selection()));
        selection
    }
}

/// `query GetDogs { dogs { __typename id name owner { __typename id name address { street city } } } }`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseData {
    pub dogs: Vec<DogWithOwner>
}

impl CacheObject for ResponseData {
    fn selection() -> Vec<FieldSelector> {
        vec![FieldSelector::object("dogs", DogWithOwner::selection())]
    }
}

pub fn owner_json(id: &str, name: &str, street: &str) -> Value {
    json!({
        "__typename": "Person",
        "id": id,
        "name": name,
        "address": { "street": street, "city": "Springfield" }
    })
}

lazy_static! {
    /// Two dogs sharing one owner, and a stray.
    pub static ref RESPONSE: Value = json!({
        "dogs": [
            {
                "__typename": "Dog",
                "id": "1",
                "name": "Rex",
                "owner": owner_json("1", "Ann", "Elm Street")
            },
            {
                "__typename": "Dog",
                "id": "2",
                "name": "Fido",
                "owner": owner_json("1", "Ann", "Elm Street")
            },
            {
                "__typename": "Dog",
                "id": "3",
                "name": "Stray",
                "owner": null
            }
        ]
    });
}
