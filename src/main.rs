#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    roam::start_server().await;
}
