use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::Server;
use log::info;
use std::convert::Infallible;
use std::error::Error;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use structopt::StructOpt;

mod service;

use service::ServiceState;

#[derive(StructOpt, Debug)]
#[structopt(
    name = "cifar-api",
    about = "HTTP service classifying uploaded images with a CIFAR-10 network"
)]
struct CmdArgs {
    #[structopt(long, default_value = "0.0.0.0", help = "Address to listen on")]
    host: IpAddr,

    #[structopt(long, default_value = "8000", help = "Port to listen on")]
    port: u16,

    #[structopt(
        long,
        parse(from_os_str),
        default_value = "model/image_classifier_clean",
        help = "Export directory of the TensorFlow SavedModel"
    )]
    model_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = CmdArgs::from_args();

    // A missing or broken model leaves the service up in degraded mode.
    let state = Arc::new(ServiceState::load(&args.model_dir));

    let make_service = make_service_fn(move |_conn: &AddrStream| {
        let state = Arc::clone(&state);

        let service = service_fn(move |req| service::handle(req, state.clone()));

        async move { Ok::<_, Infallible>(service) }
    });

    let addr = SocketAddr::new(args.host, args.port);

    let server = Server::try_bind(&addr)?.serve(make_service);
    info!("Listening on http://{}", addr);

    server.await?;

    Ok(())
}
