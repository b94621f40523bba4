use super::schema::*;
use diesel::prelude::*;

#[derive(Debug, Insertable)]
#[diesel(table_name = hash_fields)]
pub struct NewHashField<'a> {
    pub key: &'a str,
    pub field: &'a str,
    pub value: &'a str,
}
