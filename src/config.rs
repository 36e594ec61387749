use std::env;

#[derive(Clone)]
pub struct Config {
    pub mongo_uri: String,
    pub database_name: String,
    pub jwt_secret: String,
    pub upload_dir: String,
    pub frontend_origin: String,
    /// When true, deleting a workspace also removes its tasks, notifications
    /// and activity entries. Off by default: notifications and the activity
    /// log outlive their task/workspace.
    pub cascade_deletes: bool,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        let cascade_deletes = env::var("CASCADE_DELETES")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .unwrap_or(false);

        Self {
            mongo_uri: env::var("MONGO_URI").expect("MONGO_URI must be set"),
            database_name: env::var("DATABASE_NAME").unwrap_or_else(|_| "task_collab".to_string()),
            jwt_secret: env::var("JWT_SECRET").expect("JWT_SECRET must be set"),
            upload_dir: env::var("UPLOAD_DIR").unwrap_or_else(|_| "uploads".to_string()),
            frontend_origin: env::var("FRONTEND_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            cascade_deletes,
        }
    }
}
