#[macro_use]
extern crate rocket;

mod api;
mod app_state;
mod config;
mod cors;
mod engine;
mod error;
mod invoker;
mod prompt;
mod stable_diffusion;
mod types;

use rocket::{Build, Rocket};

use api::{bad_request, generate, health, internal_error, not_found, unprocessable};
use app_state::{AppState, ModelHandle};
use config::ServiceConfig;

pub fn build_rocket(rocket: Rocket<Build>, state: AppState) -> Rocket<Build> {
    rocket
        .manage(state)
        .attach(cors::Cors)
        .mount("/", routes![health, generate, cors::preflight])
        .register(
            "/",
            catchers![bad_request, not_found, unprocessable, internal_error],
        )
}

#[launch]
async fn rocket() -> _ {
    // rocket::build() 会先装好 logger，后面加载模型的日志才能打出来
    let base = rocket::build();
    let config = ServiceConfig::from_figment(base.figment());

    // 启动时加载一次模型；下载和建图是阻塞操作
    let model_id = config.model_id.clone();
    let model = tokio::task::spawn_blocking(move || ModelHandle::load(&config))
        .await
        .unwrap_or_else(|e| ModelHandle::failed(&model_id, e.to_string()));
    log::info!("model state: {:?}", model.metadata());

    build_rocket(base, AppState::new(model))
}
