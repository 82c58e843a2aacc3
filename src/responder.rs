use crate::error::ResponderError;
use crate::ledger::{
    CertificateStatus, LedgerSnapshot, RevocationReason, Serial, StatusLedger,
};
use crate::trust::TrustMaterial;
use chrono::{DateTime, Datelike, Days, Timelike, Utc};
use log::{debug, info, trace, warn};
use ocsp::{
    common::asn1::{CertId, GeneralizedTime, Oid},
    oid::OCSP_RESPONSE_BASIC_DOT,
    request::OcspRequest,
    response::{
        BasicResponse, CertStatus, CertStatusCode, CrlReason, OcspResponse, OneResp,
        ResponderId, ResponseBytes, ResponseData, RevokedInfo,
    },
};
use std::sync::Arc;

/// Time span an answer is valid for, aligned on the minute.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ValidityWindow {
    pub(crate) this_update: DateTime<Utc>,
    pub(crate) next_update: DateTime<Utc>,
}

impl ValidityWindow {
    pub(crate) fn starting_at(now: DateTime<Utc>, days: u16) -> Result<Self, ResponderError> {
        let this_update = now
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .ok_or_else(|| ResponderError::Encoding(format!("cannot truncate {now}")))?;
        let next_update = this_update
            .checked_add_days(Days::new(u64::from(days)))
            .ok_or_else(|| ResponderError::Encoding(format!("{days} days after {now} overflows")))?;
        Ok(ValidityWindow {
            this_update,
            next_update,
        })
    }
}

fn generalized_time(time: &DateTime<Utc>) -> Result<GeneralizedTime, ResponderError> {
    GeneralizedTime::new(
        time.year(),
        time.month(),
        time.day(),
        time.hour(),
        time.minute(),
        time.second(),
    )
    .map_err(|e| ResponderError::Encoding(format!("cannot encode {time}: {e}")))
}

fn serial_list(serials: &[Serial]) -> String {
    serials
        .iter()
        .map(Serial::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn crl_reason(reason: RevocationReason) -> CrlReason {
    match reason {
        RevocationReason::Unspecified => CrlReason::OcspRevokeUnspecified,
        RevocationReason::KeyCompromise => CrlReason::OcspRevokeKeyCompromise,
        RevocationReason::CaCompromise => CrlReason::OcspRevokeCaCompromise,
        RevocationReason::AffiliationChanged => CrlReason::OcspRevokeAffChanged,
        RevocationReason::Superseded => CrlReason::OcspRevokeSuperseded,
        RevocationReason::CessationOfOperation => CrlReason::OcspRevokeCessOperation,
        RevocationReason::CertificateHold => CrlReason::OcspRevokeCertHold,
        RevocationReason::PrivilegeWithdrawn => CrlReason::OcspRevokePrivWithdrawn,
        RevocationReason::AaCompromise => CrlReason::OcspRevokeAaCompromise,
    }
}

/// Turns DER requests into signed DER responses.
///
/// Serials missing from the ledger get a signed `unknown` answer rather than
/// a failed exchange.
pub struct Responder {
    trust: Arc<TrustMaterial>,
    ledger: Box<dyn StatusLedger>,
    validitydays: u16,
}

impl Responder {
    pub fn new(trust: Arc<TrustMaterial>, ledger: Box<dyn StatusLedger>, validitydays: u16) -> Self {
        Responder {
            trust,
            ledger,
            validitydays,
        }
    }

    pub async fn produce_response(&self, raw: &[u8]) -> Result<Vec<u8>, ResponderError> {
        self.produce_response_at(raw, Utc::now()).await
    }

    pub async fn produce_response_at(
        &self,
        raw: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Vec<u8>, ResponderError> {
        if raw.is_empty() {
            return Err(ResponderError::Malformed("empty request".to_string()));
        }
        let request =
            OcspRequest::parse(raw).map_err(|e| ResponderError::Malformed(e.to_string()))?;
        let cid_list = request.extract_certid_owned();
        if cid_list.is_empty() {
            return Err(ResponderError::Malformed(
                "request lists no certificate".to_string(),
            ));
        }
        let serials: Vec<Serial> = cid_list
            .iter()
            .map(|cid| Serial::from_bytes(&cid.serial_num))
            .collect();
        self.answer(cid_list, now).await.inspect_err(|e| {
            warn!("Cannot answer for serial(s) {}: {e}", serial_list(&serials));
        })
    }

    async fn answer(
        &self,
        cid_list: Vec<CertId>,
        now: DateTime<Utc>,
    ) -> Result<Vec<u8>, ResponderError> {
        let snapshot = self.ledger.snapshot().await?;
        let window = ValidityWindow::starting_at(now, self.validitydays)?;

        let mut responses = Vec::with_capacity(cid_list.len());
        for cid in cid_list {
            let cert_status = self.classify(&cid, &snapshot, &window)?;
            responses.push(OneResp {
                cid,
                cert_status,
                this_update: generalized_time(&window.this_update)?,
                next_update: Some(generalized_time(&window.next_update)?),
                one_resp_ext: None,
            });
        }
        self.sign(responses, &window)
    }

    fn classify(
        &self,
        cid: &CertId,
        snapshot: &LedgerSnapshot,
        window: &ValidityWindow,
    ) -> Result<CertStatus, ResponderError> {
        let serial = Serial::from_bytes(&cid.serial_num);
        if !self.trust.issuer.matches_key_hash(&cid.issuer_key_hash) {
            warn!(
                "Certificate {} is not known. Issuer key hash {} does not match {}.",
                serial,
                hex::encode(&cid.issuer_key_hash),
                self.trust.issuer.subject()
            );
            return Ok(CertStatus::new(CertStatusCode::Unknown, None));
        }
        let entry = match snapshot.resolve(&serial) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("{e}, answering unknown");
                return Ok(CertStatus::new(CertStatusCode::Unknown, None));
            }
        };
        debug!("Entry found for cert {}, subject {}", serial, entry.subject);
        match &entry.status {
            CertificateStatus::Valid => Ok(CertStatus::new(CertStatusCode::Good, None)),
            CertificateStatus::Revoked { revoked_at, reason } => {
                info!("Certificate {serial} is revoked");
                let revoked_at = revoked_at.unwrap_or(window.this_update);
                Ok(CertStatus::new(
                    CertStatusCode::Revoked,
                    Some(RevokedInfo::new(
                        generalized_time(&revoked_at)?,
                        Some(crl_reason(*reason)),
                    )),
                ))
            }
        }
    }

    fn sign(
        &self,
        responses: Vec<OneResp>,
        window: &ValidityWindow,
    ) -> Result<Vec<u8>, ResponderError> {
        let encoding = |e: ocsp::err::OcspError| ResponderError::Encoding(e.to_string());
        let id = ResponderId::new_key_hash(&self.trust.responder.key_hash());
        let produced = generalized_time(&window.this_update)?;
        let data = ResponseData::new(id, produced, responses, None);
        let tosign = data.to_der().map_err(encoding)?;
        let signature = self
            .trust
            .signing_key
            .sign(&tosign)
            .map_err(|_| ResponderError::Signing("signature computation failed".to_string()))?;
        let algorithm = Oid::new_from_dot(self.trust.signing_key.algorithm()).map_err(encoding)?;
        let certs = if self.trust.responder_is_issuer() {
            None
        } else {
            Some(vec![self.trust.responder.der().to_vec()])
        };
        let basic = BasicResponse::new(data, algorithm, signature, certs);
        let resp_type = Oid::new_from_dot(OCSP_RESPONSE_BASIC_DOT).map_err(encoding)?;
        let bytes = ResponseBytes::new_basic(resp_type, basic).map_err(encoding)?;
        let der = OcspResponse::new_success(bytes).to_der().map_err(encoding)?;
        trace!("Signed response of {} bytes", der.len());
        Ok(der)
    }
}
