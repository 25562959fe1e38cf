//! Typed query shapes and canned responses shared by the store's tests and benchmarks.

#[macro_use]
extern crate lazy_static;

pub mod get_dog;
pub mod get_dogs;
pub mod get_person;
pub mod search;
pub mod todos;

use gql_store::FieldSelector;

pub(crate) fn scalars(names: &[&str]) -> Vec<FieldSelector> {
    names.iter().map(|name| FieldSelector::scalar(*name)).collect()
}
