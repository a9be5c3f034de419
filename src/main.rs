use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use log::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use std::path::PathBuf;
use std::sync::Mutex;

mod api;
mod blockchain;

use api::handlers::AppState;
use blockchain::chain::BlockchainError;
use blockchain::{BlockStore, Blockchain};

/// Opens the ledger at `data_dir` if one has been initialized there
fn open_ledger(data_dir: &PathBuf) -> anyhow::Result<Option<Blockchain>> {
    let store = BlockStore::new(data_dir)?;

    match Blockchain::open(store) {
        Ok(chain) => Ok(Some(chain)),
        Err(BlockchainError::NotInitialized) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::init_ledger,
        api::handlers::get_chain,
        api::handlers::validate_chain,
        api::handlers::create_wallet,
        api::handlers::get_balance,
        api::handlers::send
    ),
    components(
        schemas(
            api::handlers::InitRequest,
            api::handlers::InitResponse,
            api::handlers::ChainResponse,
            api::handlers::BlockResponse,
            api::handlers::TransactionResponse,
            api::handlers::TxInputResponse,
            api::handlers::TxOutputResponse,
            api::handlers::SendRequest,
            api::handlers::SendResponse,
            api::handlers::WalletResponse
        )
    ),
    tags(
        (name = "ledger", description = "UTXO ledger API endpoints")
    ),
    info(
        title = "UTXO Ledger API",
        version = "1.0.0",
        description = "A single-writer UTXO blockchain with proof-of-work sealing",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    )
)]
struct ApiDoc;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    // Store location is explicit configuration, never a baked-in path
    let data_dir = PathBuf::from(
        std::env::var("LEDGER_DATA_DIR").unwrap_or_else(|_| "data/ledger".to_string()),
    );

    let ledger = open_ledger(&data_dir)?;
    match &ledger {
        Some(chain) => info!(
            "Opened ledger at {} with tip {}",
            data_dir.display(),
            hex::encode(chain.tip())
        ),
        None => info!(
            "No ledger at {}, waiting for init",
            data_dir.display()
        ),
    }

    let state = web::Data::new(AppState {
        data_dir,
        ledger: Mutex::new(ledger),
    });

    info!("Starting HTTP server at http://localhost:8080");

    // Start HTTP server
    HttpServer::new(move || {
        // Configure CORS
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        // Configure OpenAPI documentation
        let openapi = ApiDoc::openapi();

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .app_data(state.clone())
            // API routes
            .configure(api::configure_routes)
            // Swagger UI
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", openapi.clone()),
            )
    })
    .bind(("127.0.0.1", 8080))?
    .run()
    .await?;

    Ok(())
}
