// Entity models and their store operations.
//
// Categories and places are shared reference dimensions keyed by unique
// name; entries belong to exactly one user and every query over them is
// scoped by user id.

pub mod category;
pub mod entry;
pub mod place;
pub mod user;

pub use category::{find_or_create_category, list_categories, Category};
pub use entry::{
    add_entry, delete_entry, edit_entry, get_entry, get_filtered_entries, get_paginated_entries,
    get_recent_entries, Entry, EntryPage, EntryPatch, EntryType, NewEntry,
};
pub use place::{find_or_create_place, list_places, Place};
pub use user::{create_user, find_user_by_email, verify_credentials, User};
