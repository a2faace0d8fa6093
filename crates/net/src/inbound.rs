//! Basisverhalten fuer eingehende Verbindungen
//!
//! Eingehende Verbindungen (Master-Dienste, Edge-Clients) muessen innerhalb
//! der Registrierungsfrist einen gueltigen `REGISTER`-Frame liefern, sonst
//! wird die Verbindung mit einer `TIMEOUT`-Fehler-Antwort geschlossen.
//! Protokollfehler werden grundsaetzlich als Wire-Fehler beantwortet und
//! beenden die Verbindung nicht.

use futures_util::{SinkExt, StreamExt};
use sonar_protocol::command::ErrorCode;
use sonar_protocol::wire::{LineCodec, WireFrame};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use crate::error::NetzFehler;

/// Wartet auf den Registrierungs-Frame einer frisch akzeptierten Verbindung
///
/// Laeuft die Frist ab, wird eine `TIMEOUT`-Fehler-Antwort gesendet und
/// [`NetzFehler::RegistrierungsTimeout`] zurueckgegeben. Der Aufrufer
/// prueft anschliessend selbst, ob der Frame ein gueltiger `REGISTER` ist.
pub async fn registrierung_erwarten<S>(
    framed: &mut Framed<S, LineCodec>,
    frist: Duration,
) -> Result<WireFrame, NetzFehler>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match tokio::time::timeout(frist, framed.next()).await {
        Err(_) => {
            let _ = framed
                .send(WireFrame::antwort_fehler(0, ErrorCode::Timeout))
                .await;
            Err(NetzFehler::RegistrierungsTimeout)
        }
        Ok(None) => Err(NetzFehler::Getrennt),
        Ok(Some(Err(e))) => Err(e.into()),
        Ok(Some(Ok(frame))) => Ok(frame),
    }
}

/// Sendet eine OK-Antwort
pub async fn ok_senden<S>(
    framed: &mut Framed<S, LineCodec>,
    id: u64,
    argumente: Vec<String>,
) -> Result<(), NetzFehler>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    framed
        .send(WireFrame::antwort_ok(id, argumente))
        .await
        .map_err(NetzFehler::from)
}

/// Sendet eine ERROR-Antwort mit Fehler-Code
pub async fn fehler_senden<S>(
    framed: &mut Framed<S, LineCodec>,
    id: u64,
    code: ErrorCode,
) -> Result<(), NetzFehler>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    framed
        .send(WireFrame::antwort_fehler(id, code))
        .await
        .map_err(NetzFehler::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sonar_protocol::command::Command;

    #[tokio::test]
    async fn registrierung_innerhalb_der_frist() {
        let (client, server) = tokio::io::duplex(1024);
        let mut client_framed = Framed::new(client, LineCodec::neu());
        let mut server_framed = Framed::new(server, LineCodec::neu());

        client_framed
            .send(WireFrame::neu(1, Command::Register, vec!["acme".into()]))
            .await
            .unwrap();

        let frame = registrierung_erwarten(&mut server_framed, Duration::from_secs(1))
            .await
            .expect("Registrierung erwartet");
        assert_eq!(frame.befehl, "REGISTER");
        assert_eq!(frame.argumente, vec!["acme".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn registrierung_frist_laeuft_ab() {
        let (client, server) = tokio::io::duplex(1024);
        let mut server_framed = Framed::new(server, LineCodec::neu());

        let ergebnis = tokio::join!(
            registrierung_erwarten(&mut server_framed, Duration::from_secs(5)),
            async {
                // Client sendet nichts; nur die Zeit voranschreiten lassen
                tokio::time::sleep(Duration::from_secs(6)).await;
            }
        )
        .0;

        assert!(matches!(ergebnis, Err(NetzFehler::RegistrierungsTimeout)));

        // Der Client muss die TIMEOUT-Fehler-Antwort erhalten haben
        let mut client_framed = Framed::new(client, LineCodec::neu());
        let antwort = client_framed.next().await.unwrap().unwrap();
        match antwort.als_antwort() {
            Some(Err(code)) => assert_eq!(code, ErrorCode::Timeout),
            _ => panic!("Erwartet TIMEOUT-Fehler"),
        }
    }

    #[tokio::test]
    async fn registrierung_bei_geschlossener_verbindung() {
        let (client, server) = tokio::io::duplex(1024);
        drop(client);
        let mut server_framed = Framed::new(server, LineCodec::neu());

        let ergebnis =
            registrierung_erwarten(&mut server_framed, Duration::from_secs(1)).await;
        assert!(matches!(ergebnis, Err(NetzFehler::Getrennt)));
    }

    #[tokio::test]
    async fn ok_und_fehler_senden() {
        let (client, server) = tokio::io::duplex(1024);
        let mut client_framed = Framed::new(client, LineCodec::neu());
        let mut server_framed = Framed::new(server, LineCodec::neu());

        ok_senden(&mut server_framed, 7, vec!["a".into()]).await.unwrap();
        fehler_senden(&mut server_framed, 8, ErrorCode::InvalidArgument)
            .await
            .unwrap();

        let ok = client_framed.next().await.unwrap().unwrap();
        assert!(matches!(ok.als_antwort(), Some(Ok(_))));

        let fehler = client_framed.next().await.unwrap().unwrap();
        match fehler.als_antwort() {
            Some(Err(code)) => assert_eq!(code, ErrorCode::InvalidArgument),
            _ => panic!("Erwartet Fehler-Antwort"),
        }
    }
}
