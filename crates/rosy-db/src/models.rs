/// Database row types; these map directly to SQLite rows.
/// Converted into rosy-types models at the query boundary.

pub struct UserRow {
    pub email: String,
    pub name: String,
    pub points: u32,
    pub deposits: u32,
    pub badges: String,
}

pub struct ProofRow {
    pub id: String,
    pub user_email: String,
    pub image_ref: String,
    pub filename: String,
    pub outcome: String,
    pub created_at: String,
}

pub struct RewardRow {
    pub id: String,
    pub submission_id: String,
    pub user_email: String,
    pub points_delta: u32,
    pub deposits_delta: u32,
    pub created_at: String,
}
