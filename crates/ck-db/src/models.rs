//! Database row types, mapped directly from SQLite rows.
//! Distinct from the ck-types wire models.

pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub password: String,
    pub status: Option<String>,
    pub created_at: String,
}

pub struct PostRow {
    pub id: i64,
    pub author: String,
    pub content: String,
    pub visibility: String,
    pub created_at: String,
    /// Attachment paths in upload order.
    pub attachments: Vec<String>,
}
