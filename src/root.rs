//! Bootstrapping the zone model from the root zone.
//!
//! The root zone itself is obtained by AXFR. Not every root server permits
//! that, so the caller walks the root-server list until one does; a refusal
//! surfaces as [`XfrError::Refused`] and the next server gets its turn.

use std::time::Instant;

use bytes::Bytes;
use domain::base::iana::Rcode;
use domain::base::{Name, ParsedName};
use domain::net::client::request::{
    RequestMessage, RequestMessageMulti, SendRequestMulti,
};
use domain::net::client::stream;
use domain::net::xfr::protocol::XfrResponseInterpreter;
use domain::rdata::ZoneRecordData;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::util::round_millis;
use crate::xfr::{build_transfer_request, XfrError, TRANSFER_TIMEOUT};
use crate::zone::Zone;

/// Transfers the root zone from `server` into a fresh zone model.
///
/// `server` is a root server hostname; the operating system resolves it and
/// the transfer runs over TCP against `port` (53 outside of tests). Every
/// record of the transfer feeds the model, so the result carries both the
/// delegations and their glue.
pub async fn root_axfr(
    server: &str,
    port: u16,
    token: &CancellationToken,
) -> Result<Zone, XfrError> {
    let started = Instant::now();
    let qname = Name::<Bytes>::root_bytes();
    let request = build_transfer_request(&qname, false)?;

    let target = format!("{}:{}", server, port);
    let connect = async {
        tokio::time::timeout(
            TRANSFER_TIMEOUT,
            TcpStream::connect((server, port)),
        )
        .await
        .map_err(|_| XfrError::ConnectTimeout(target.clone()))?
        .map_err(|err| XfrError::Connect(target.clone(), err))
    };
    let tcp = tokio::select! {
        biased;
        _ = token.cancelled() => return Err(XfrError::Cancelled),
        tcp = connect => tcp?,
    };

    let mut config = stream::Config::default();
    config.set_response_timeout(TRANSFER_TIMEOUT);
    let (conn, transport) = stream::Connection::<
        RequestMessage<Vec<u8>>,
        RequestMessageMulti<Vec<u8>>,
    >::with_config(tcp, config);
    tokio::spawn(transport.run());
    let request =
        RequestMessageMulti::new(request).map_err(|_| XfrError::Compose)?;
    let mut response = SendRequestMulti::send_request(&conn, request);

    let mut zone = Zone::new();
    let mut interpreter = XfrResponseInterpreter::new();
    while !interpreter.is_finished() {
        let msg = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(XfrError::Cancelled),
            msg = response.get_response() => msg?,
        };
        let Some(msg) = msg else {
            break;
        };

        let rcode = msg.header().rcode();
        if rcode == Rcode::REFUSED || rcode == Rcode::NOTAUTH {
            return Err(XfrError::Refused(rcode));
        }
        if rcode != Rcode::NOERROR {
            return Err(XfrError::BadRcode(rcode));
        }

        for record in msg
            .answer()?
            .limit_to::<ZoneRecordData<Bytes, ParsedName<Bytes>>>()
        {
            zone.add_record(&record?);
        }

        if let Ok(updates) = interpreter.interpret_response(msg) {
            for update in updates {
                if update.is_err() {
                    break;
                }
            }
        }
    }

    info!(
        "ROOT {server} xfr size: {} records in {:?}",
        zone.records(),
        round_millis(started.elapsed())
    );
    Ok(zone)
}

//============ Tests =========================================================
