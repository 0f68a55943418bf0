use anyhow::{Context, bail};
use clap::Parser;
use diesel::prelude::*;
use gradebook_server::auth::hash_password;
use gradebook_server::schema::users::dsl as users_dsl;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

/// Sets the password of an existing gradebook user.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Database connection string
    /// Can also be set using the DATABASE_URL environment variable.
    #[arg(long, env = "DATABASE_URL")]
    connection_str: String,

    /// Username whose password is replaced
    username: String,

    /// The new password
    password: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    fmt().with_env_filter(EnvFilter::try_new("info")?).init();

    if args.password.is_empty() {
        bail!("The password must not be empty");
    }

    let mut conn = PgConnection::establish(&args.connection_str)
        .context("Failed to connect to the database")?;

    let password_hash = hash_password(&args.password)
        .map_err(|e| anyhow::anyhow!("{}", e))
        .context("Failed to hash password")?;

    let rows_affected = diesel::update(users_dsl::users.filter(users_dsl::username.eq(&args.username)))
        .set(users_dsl::password_hash.eq(password_hash))
        .execute(&mut conn)
        .context("Failed to update password")?;

    match rows_affected {
        0 => bail!("User '{}' not found", args.username),
        _ => {
            info!("Password for '{}' updated", args.username);
            Ok(())
        }
    }
}
