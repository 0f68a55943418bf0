use serde::{Deserialize, Serialize};

/// `sort` / `dir` query parameters shared by every grade listing.
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct GradeSortParams {
    pub sort: Option<String>,
    pub dir: Option<String>,
}
