use crate::scalars;
use gql_store::{CacheObject, FieldSelector};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Todo {
    #[serde(rename = "__typename")]
    pub typename: String,
    pub id: String,
    pub text: String,
    pub complete: bool,
    pub due: String
}

impl CacheObject for Todo {
    fn selection() -> Vec<FieldSelector> {
        scalars(&["__typename", "id", "text", "complete", "due"])
    }
}

/// `query Todos { todos { __typename id text complete due } }`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseData {
    pub todos: Vec<Todo>
}

impl CacheObject for ResponseData {
    fn selection() -> Vec<FieldSelector> {
        vec![FieldSelector::object("todos", Todo::selection())]
    }
}
