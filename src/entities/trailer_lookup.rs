use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "trailer_lookup")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub query_key: String,
    pub title: String,
    pub year: Option<i32>,
    pub tmdb_id: Option<i32>,
    pub youtube_key: Option<String>,
    pub source: Option<String>,
    pub updated_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
