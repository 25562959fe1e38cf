//! A person whose pets point back at them, so the stored graph has a cycle.

use crate::{get_dog::Dog, scalars};
use gql_store::{CacheObject, FieldSelector};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Person {
    #[serde(rename = "__typename")]
    pub typename: String,
    pub id: String,
    pub name: String,
    pub pets: Vec<Dog>
}

impl CacheObject for Person {
    fn selection() -> Vec<FieldSelector> {
        let mut selection = scalars(&["__typename", "id", "name"]);
        selection.push(FieldSelector::object("pets", Dog::selection()));
        selection
    }
}

/// `query GetPerson($id: ID!) { person(id: $id) { __typename id name pets { __typename id name owner { __typename id } } } }`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseData {
    pub person: Person
}

impl CacheObject for ResponseData {
    fn selection() -> Vec<FieldSelector> {
        vec![FieldSelector::object("person", Person::selection())]
    }
}

lazy_static! {
    pub static ref RESPONSE: Value = json!({
        "person": {
            "__typename": "Person",
            "id": "1",
            "name": "Ann",
            "pets": [
                {
                    "__typename": "Dog",
                    "id": "1",
                    "name": "Rex",
                    "owner": { "__typename": "Person", "id": "1" }
                }
            ]
        }
    });
}
