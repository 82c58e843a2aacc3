#[macro_use]
extern crate rocket;
mod error;
mod ledger;
mod request;
mod responder;
mod r#struct;
mod trust;
#[cfg(test)]
mod tests;

use crate::error::StartupError;
use crate::r#struct::{Cli, Config, Fileconfig};
use crate::request::{InboundRequest, RequestMethod, extract_request_bytes};
use clap::Parser;
use config_file::FromConfigFile;
use log::{info, trace, warn};
use rocket::data::ToByteUnit;
use rocket::http::uri::Origin;
use rocket::http::{ContentType, Status};
use rocket::{Build, Data, Request, Rocket, State};
use std::net::IpAddr;
use std::path::Path;

type OcspReply = (Status, (ContentType, Vec<u8>));

fn ocsp_response_type() -> ContentType {
    ContentType::new("application", "ocsp-response")
}

/// Failures never carry a body, the status code is all the client learns.
fn rejected() -> OcspReply {
    (Status::BadRequest, (ocsp_response_type(), Vec::new()))
}

async fn answer(config: &Config, request: InboundRequest<'_>, client: Option<IpAddr>) -> OcspReply {
    let client = client.map_or_else(|| String::from("unknown client"), |ip| ip.to_string());
    let raw = match extract_request_bytes(&request, config.strict) {
        Ok(raw) => raw,
        Err(e) => {
            warn!("Rejected request from {client}: {e}");
            return rejected();
        }
    };
    trace!("Got a request from {client}");
    match config.responder.produce_response(&raw).await {
        Ok(response) => {
            info!("Send response to {client}");
            (Status::Ok, (ocsp_response_type(), response))
        }
        Err(e) => {
            warn!("Unable to answer request from {client}: {e}");
            rejected()
        }
    }
}

#[post("/<_..>", data = "<data>")]
async fn post_request(
    config: &State<Config>,
    content_type: Option<&ContentType>,
    data: Data<'_>,
    client: Option<IpAddr>,
) -> OcspReply {
    let body = match data.open(3.mebibytes()).into_bytes().await {
        Ok(body) if body.is_complete() => body.into_inner(),
        Ok(_) => {
            warn!("Request body from {client:?} is over the size limit");
            return rejected();
        }
        Err(e) => {
            warn!("Cannot read request body from {client:?}: {e}");
            return rejected();
        }
    };
    let content_type = content_type.map(|c| c.to_string());
    let request = InboundRequest {
        method: RequestMethod::Post,
        content_type: content_type.as_deref(),
        body: &body,
        path: "/",
    };
    answer(config, request, client).await
}

#[get("/<_..>")]
async fn get_request(
    config: &State<Config>,
    content_type: Option<&ContentType>,
    origin: &Origin<'_>,
    client: Option<IpAddr>,
) -> OcspReply {
    let path = match origin.path().raw().percent_decode() {
        Ok(path) => path,
        Err(e) => {
            warn!("Request path from {client:?} is not UTF-8: {e}");
            return rejected();
        }
    };
    let content_type = content_type.map(|c| c.to_string());
    let request = InboundRequest {
        method: RequestMethod::Get,
        content_type: content_type.as_deref(),
        body: &[],
        path: &path,
    };
    answer(config, request, client).await
}

/// Only GET and POST carry OCSP requests, anything else is turned down by the decoder.
async fn unsupported(
    config: &Config,
    method: &str,
    content_type: Option<&ContentType>,
    client: Option<IpAddr>,
) -> OcspReply {
    let content_type = content_type.map(|c| c.to_string());
    let request = InboundRequest {
        method: RequestMethod::Other(method.to_string()),
        content_type: content_type.as_deref(),
        body: &[],
        path: "/",
    };
    answer(config, request, client).await
}

#[put("/<_..>")]
async fn put_request(
    config: &State<Config>,
    content_type: Option<&ContentType>,
    client: Option<IpAddr>,
) -> OcspReply {
    unsupported(config, "PUT", content_type, client).await
}

#[delete("/<_..>")]
async fn delete_request(
    config: &State<Config>,
    content_type: Option<&ContentType>,
    client: Option<IpAddr>,
) -> OcspReply {
    unsupported(config, "DELETE", content_type, client).await
}

#[patch("/<_..>")]
async fn patch_request(
    config: &State<Config>,
    content_type: Option<&ContentType>,
    client: Option<IpAddr>,
) -> OcspReply {
    unsupported(config, "PATCH", content_type, client).await
}

#[catch(default)]
fn fallback(status: Status, request: &Request<'_>) -> OcspReply {
    warn!(
        "Rejected {} {} before it reached a handler: {status}",
        request.method(),
        request.uri()
    );
    rejected()
}

fn load_config(path: &Path) -> Result<Config, StartupError> {
    if !path.exists() {
        return Err(StartupError::Config(format!(
            "config file not found at {}",
            path.display()
        )));
    }
    let file = Fileconfig::from_config_file(path).map_err(|e| {
        StartupError::Config(format!("cannot read {}: {e}", path.display()))
    })?;
    Config::from_file(file)
}

fn build_rocket(config: Config) -> Rocket<Build> {
    let figment = rocket::Config::figment()
        .merge(("port", config.port))
        .merge(("address", config.address));
    rocket::build()
        .configure(figment)
        .mount(
            "/",
            routes![
                get_request,
                post_request,
                put_request,
                delete_request,
                patch_request
            ],
        )
        .register("/", catchers![fallback])
        .manage(config)
}

#[rocket::main]
async fn main() -> Result<(), rocket::Error> {
    let cli = Cli::parse();
    let config = match load_config(&cli.config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    let _rocket = build_rocket(config).launch().await?;
    Ok(())
}
