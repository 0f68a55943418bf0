use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}
