//! Simultaneous active and passive open from one Preconnection (§4.8).

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::event::Event;
use crate::listener::Listener;
use crate::preconnection::Preconnection;

/// Runs `initiate` and `listen` concurrently. The first side to produce an
/// Established Connection wins; per the tie-break this crate adopts for
/// simultaneous success (§9 Open Question), the outbound attempt is
/// preferred when both succeed at effectively the same time.
pub async fn rendezvous(preconnection: &Preconnection) -> Result<(Connection, Listener)> {
    if preconnection.locals().is_empty() || preconnection.remotes().is_empty() {
        return Err(Error::configuration(
            "rendezvous requires both local and remote endpoints",
        ));
    }

    let listener = preconnection.listen().await?;
    let initiate_fut = preconnection.initiate(None);
    tokio::pin!(initiate_fut);

    tokio::select! {
        biased;

        outbound = &mut initiate_fut => {
            match outbound {
                Ok(conn) => {
                    conn.notify(Event::RendezvousDone);
                    Ok((conn, listener))
                }
                Err(outbound_err) => match listener.accept().await {
                    Some(conn) => {
                        conn.notify(Event::RendezvousDone);
                        Ok((conn, listener))
                    }
                    None => Err(Error::EstablishmentFailure(vec![outbound_err])),
                },
            }
        }
        inbound = listener.accept() => {
            match inbound {
                Some(conn) => {
                    conn.notify(Event::RendezvousDone);
                    Ok((conn, listener))
                }
                None => match initiate_fut.await {
                    Ok(conn) => {
                        conn.notify(Event::RendezvousDone);
                        Ok((conn, listener))
                    }
                    Err(err) => Err(err),
                },
            }
        }
    }
}
