use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use server_api::session::{mint_session_token, AuthConfig};
use shared::domain::UserId;
use storage::{CreditOutcome, Storage, UserProfileFields};

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/server.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Registers a user the way the identity webhook would.
    CreateUser {
        external_id: String,
        email: String,
        username: String,
        #[arg(long, default_value = "")]
        photo: String,
        #[arg(long)]
        first_name: Option<String>,
        #[arg(long)]
        last_name: Option<String>,
    },
    GrantCredits {
        user_id: i64,
        amount: i64,
    },
    ListImages {
        user_id: i64,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Prints a bearer token for a user's external id.
    MintToken {
        external_id: String,
        #[arg(long, env = "APP__AUTH_SECRET", default_value = "devsecret")]
        secret: String,
        #[arg(long, default_value_t = 3600)]
        ttl_seconds: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::MintToken {
            external_id,
            secret,
            ttl_seconds,
        } => {
            let token = mint_session_token(
                &AuthConfig {
                    secret,
                    ttl_seconds,
                },
                &external_id,
            )?;
            println!("{token}");
            Ok(())
        }
        command => {
            let storage = Storage::new(&cli.database_url)
                .await
                .with_context(|| format!("opening {}", cli.database_url))?;
            run_storage_command(&storage, command).await
        }
    }
}

async fn run_storage_command(storage: &Storage, command: Command) -> Result<()> {
    match command {
        Command::CreateUser {
            external_id,
            email,
            username,
            photo,
            first_name,
            last_name,
        } => {
            let user = storage
                .create_user(
                    &external_id,
                    &UserProfileFields {
                        email,
                        username,
                        photo,
                        first_name,
                        last_name,
                    },
                )
                .await?;
            println!(
                "created user_id={} credit_balance={}",
                user.user_id, user.credit_balance
            );
        }
        Command::GrantCredits { user_id, amount } => {
            match storage.update_credits(UserId(user_id), amount).await? {
                CreditOutcome::Updated { credit_balance } => {
                    println!("user_id={user_id} credit_balance={credit_balance}");
                }
                CreditOutcome::Insufficient { credit_balance } => {
                    return Err(anyhow!(
                        "balance of user_id={user_id} is {credit_balance}; cannot apply {amount}"
                    ));
                }
                CreditOutcome::UserNotFound => return Err(anyhow!("no user with id {user_id}")),
            }
        }
        Command::ListImages { user_id, limit } => {
            let (images, total) = storage
                .list_images_by_author(UserId(user_id), limit, 0)
                .await?;
            for image in &images {
                println!(
                    "{}\t{}\t{}\t{}",
                    image.image_id,
                    image.draft.transformation_type,
                    image.updated_at.to_rfc3339(),
                    image.draft.title
                );
            }
            println!("showing {} of {total}", images.len());
        }
        Command::MintToken { external_id, .. } => {
            return Err(anyhow!("mint-token for {external_id} does not use storage"));
        }
    }

    Ok(())
}
