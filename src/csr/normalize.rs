//! Turns a raw [`CsrParams`] record into a canonical [`DesiredState`].

use std::collections::BTreeMap;

use der::flagset::FlagSet;
use log::warn;
use x509_cert::ext::pkix::crl::dp::{DistributionPoint, Reasons};
use x509_cert::ext::pkix::name::{DistributionPointName, GeneralName};

use super::extensions::{parse_basic_constraints, parse_key_usage, parse_revocation_reason};
use super::params::{
    AuthorityKeyIdentifierValue, BasicConstraintsValue, CrlDistributionPointParams, CsrParams,
    DesiredState, NameConstraintsValue, NameValue, Requested, SubjectKeyIdentifierMode,
};
use crate::error::{CsrKitError, Result};
use crate::name::{self, NameAttribute, TypedName, parse_name};
use crate::oid::{self, COMMON_NAME};

impl DesiredState {
    /// Normalizes `params`.
    ///
    /// Fails with [`CsrKitError::Configuration`] on conflicting options, malformed hex
    /// identifiers, unparseable names and invalid CRL distribution points.
    pub fn from_params(params: &CsrParams) -> Result<Self> {
        if params.version != 1 {
            warn!(
                "CSR version {} requested; only version 1 exists (RFC 2986), version 1 is used",
                params.version
            );
        }

        let (subject, subject_ordered) = normalize_subject(params)?;

        let mut san_from_common_name = false;
        let requested_san = params.subject_alt_name.as_deref().unwrap_or_default();
        let subject_alt_name = if !requested_san.is_empty() {
            let names = requested_san
                .iter()
                .map(|name| parse_name(name, "Subject Alternative Name"))
                .collect::<Result<Vec<_>>>()?;
            Some(Requested::new(names, params.subject_alt_name_critical))
        } else if params.use_common_name_for_san {
            subject
                .iter()
                .find(|(oid, _)| *oid == COMMON_NAME)
                .map(|(_, common_name)| {
                    san_from_common_name = true;
                    Requested::new(
                        vec![TypedName::Dns(common_name.clone())],
                        params.subject_alt_name_critical,
                    )
                })
        } else {
            None
        };

        let key_usage = match params.key_usage.as_deref() {
            Some(names) if !names.is_empty() => {
                Some(Requested::new(parse_key_usage(names)?, params.key_usage_critical))
            }
            _ => None,
        };

        let extended_key_usage = match params.extended_key_usage.as_deref() {
            Some(names) if !names.is_empty() => {
                let oids = names
                    .iter()
                    .map(|name| oid::name_to_oid(name))
                    .collect::<Result<Vec<_>>>()?;
                Some(Requested::new(oids, params.extended_key_usage_critical))
            }
            _ => None,
        };

        let basic_constraints = match params.basic_constraints.as_deref() {
            Some(entries) if !entries.is_empty() => {
                let (ca, path_length) = parse_basic_constraints(entries)?;
                Some(Requested::new(
                    BasicConstraintsValue { ca, path_length },
                    params.basic_constraints_critical,
                ))
            }
            _ => None,
        };

        let ocsp_must_staple = params
            .ocsp_must_staple
            .then(|| Requested::new((), params.ocsp_must_staple_critical));

        let permitted = parse_names(
            params.name_constraints_permitted.as_deref(),
            "name constraints permitted",
        )?;
        let excluded = parse_names(
            params.name_constraints_excluded.as_deref(),
            "name constraints excluded",
        )?;
        let name_constraints = (!permitted.is_empty() || !excluded.is_empty()).then(|| {
            Requested::new(
                NameConstraintsValue {
                    permitted,
                    excluded,
                },
                params.name_constraints_critical,
            )
        });

        let subject_key_identifier = match (
            params.create_subject_key_identifier,
            params.subject_key_identifier.as_deref(),
        ) {
            (true, Some(_)) => {
                return Err(CsrKitError::Configuration(
                    "subject_key_identifier cannot be specified if create_subject_key_identifier is true"
                        .to_string(),
                ));
            }
            (true, None) => SubjectKeyIdentifierMode::Derive,
            (false, Some(text)) => {
                SubjectKeyIdentifierMode::Explicit(parse_hex_identifier(text, "subject_key_identifier")?)
            }
            (false, None) => SubjectKeyIdentifierMode::Absent,
        };

        let authority_key_identifier = normalize_authority_key_identifier(params)?;

        let crl_distribution_points = match params.crl_distribution_points.as_deref() {
            Some(points) if !points.is_empty() => Some(
                points
                    .iter()
                    .enumerate()
                    .map(|(index, point)| {
                        parse_distribution_point(point).map_err(|e| {
                            CsrKitError::Configuration(format!(
                                "Error while parsing CRL distribution point #{index}: {}",
                                bare_message(&e)
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?,
            ),
            _ => None,
        };

        Ok(Self {
            subject,
            subject_ordered,
            subject_alt_name,
            san_from_common_name,
            key_usage,
            extended_key_usage,
            basic_constraints,
            ocsp_must_staple,
            name_constraints,
            subject_key_identifier,
            authority_key_identifier,
            crl_distribution_points,
            digest: params.digest.clone(),
        })
    }
}

fn normalize_subject(params: &CsrParams) -> Result<(Vec<NameAttribute>, bool)> {
    let discrete = [
        (oid::COUNTRY_NAME, &params.country_name),
        (oid::STATE_OR_PROVINCE_NAME, &params.state_or_province_name),
        (oid::LOCALITY_NAME, &params.locality_name),
        (oid::ORGANIZATION_NAME, &params.organization_name),
        (oid::ORGANIZATIONAL_UNIT_NAME, &params.organizational_unit_name),
        (oid::COMMON_NAME, &params.common_name),
        (oid::EMAIL_ADDRESS, &params.email_address),
    ];
    let mut subject: Vec<NameAttribute> = discrete
        .into_iter()
        .filter_map(|(oid, value)| match value.as_deref() {
            Some(value) if !value.is_empty() => Some((oid, value.to_string())),
            _ => None,
        })
        .collect();

    if let Some(map) = &params.subject {
        subject.extend(parse_name_map(map, "subject")?);
    }

    match &params.subject_ordered {
        Some(entries) if !entries.is_empty() => {
            if !subject.is_empty() {
                return Err(CsrKitError::Configuration(
                    "subject_ordered cannot be combined with any other subject field".to_string(),
                ));
            }
            let mut ordered = Vec::new();
            for (index, entry) in entries.iter().enumerate() {
                if entry.len() != 1 {
                    return Err(CsrKitError::Configuration(format!(
                        "Entry #{} in subject_ordered must have exactly one key, but has {}",
                        index + 1,
                        entry.len()
                    )));
                }
                ordered.extend(parse_name_map(entry, "subject_ordered")?);
            }
            Ok((ordered, true))
        }
        _ => Ok((subject, false)),
    }
}

/// Expands `{type: value | [values]}` into attributes, skipping empty values.
fn parse_name_map(map: &BTreeMap<String, NameValue>, field: &str) -> Result<Vec<NameAttribute>> {
    let mut attributes = Vec::new();
    for (key, value) in map {
        let oid = oid::name_to_oid(key).map_err(|e| {
            CsrKitError::Configuration(format!("Error while processing {field}: {}", bare_message(&e)))
        })?;
        attributes.extend(
            value
                .values()
                .into_iter()
                .filter(|value| !value.is_empty())
                .map(|value| (oid, value.to_string())),
        );
    }
    Ok(attributes)
}

fn parse_names(names: Option<&[String]>, context: &str) -> Result<Vec<TypedName>> {
    names
        .unwrap_or_default()
        .iter()
        .map(|name| parse_name(name, context))
        .collect()
}

/// Decodes `01:ab:...` or `01ab...` into bytes.
fn parse_hex_identifier(text: &str, field: &str) -> Result<Vec<u8>> {
    hex::decode(text.replace(':', ""))
        .map_err(|e| CsrKitError::Configuration(format!("Cannot parse {field}: {e}")))
}

fn normalize_authority_key_identifier(
    params: &CsrParams,
) -> Result<Option<AuthorityKeyIdentifierValue>> {
    let key_identifier = params
        .authority_key_identifier
        .as_deref()
        .map(|text| parse_hex_identifier(text, "authority_key_identifier"))
        .transpose()?;
    let issuer = params
        .authority_cert_issuer
        .as_deref()
        .map(|names| parse_names(Some(names), "authority cert issuer"))
        .transpose()?;
    let serial_number = params.authority_cert_serial_number;

    if key_identifier.is_none() && issuer.is_none() && serial_number.is_none() {
        return Ok(None);
    }
    Ok(Some(AuthorityKeyIdentifierValue {
        key_identifier,
        issuer,
        serial_number,
    }))
}

fn parse_distribution_point(point: &CrlDistributionPointParams) -> Result<DistributionPoint> {
    let general_names = |names: &[String], context: &str| -> Result<Vec<GeneralName>> {
        names
            .iter()
            .map(|name| parse_name(name, context)?.to_general_name())
            .collect()
    };

    if point.full_name.is_some() && point.relative_name.is_some() {
        return Err(CsrKitError::Configuration(
            "full_name and relative_name are mutually exclusive".to_string(),
        ));
    }
    if point.full_name.is_none() && point.relative_name.is_none() && point.crl_issuer.is_none() {
        return Err(CsrKitError::Configuration(
            "one of full_name, relative_name or crl_issuer is required".to_string(),
        ));
    }

    let mut distribution_point = None;
    if let Some(full_name) = &point.full_name {
        if full_name.is_empty() {
            return Err(CsrKitError::Configuration("full_name must not be empty".to_string()));
        }
        distribution_point = Some(DistributionPointName::FullName(general_names(
            full_name,
            "full name",
        )?));
    }
    if let Some(relative_name) = &point.relative_name {
        if relative_name.is_empty() {
            return Err(CsrKitError::Configuration(
                "relative_name must not be empty".to_string(),
            ));
        }
        let attributes = relative_name
            .iter()
            .map(|component| name::parse_attribute(component))
            .collect::<Result<Vec<_>>>()?;
        distribution_point = Some(DistributionPointName::NameRelativeToCRLIssuer(
            name::encode_rdn(&attributes)?,
        ));
    }

    let crl_issuer = match &point.crl_issuer {
        Some(issuer) if issuer.is_empty() => {
            return Err(CsrKitError::Configuration("crl_issuer must not be empty".to_string()));
        }
        Some(issuer) => Some(general_names(issuer, "CRL issuer")?),
        None => None,
    };

    let reasons = match &point.reasons {
        Some(names) => {
            let mut flags = FlagSet::<Reasons>::default();
            for name in names {
                flags |= parse_revocation_reason(name)?;
            }
            Some(flags)
        }
        None => None,
    };

    Ok(DistributionPoint {
        distribution_point,
        reasons,
        crl_issuer,
    })
}

/// The message of a configuration error without its category prefix.
fn bare_message(error: &CsrKitError) -> String {
    match error {
        CsrKitError::Configuration(message) => message.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use der::flagset::FlagSet;
    use x509_cert::ext::pkix::KeyUsages;

    fn params() -> CsrParams {
        CsrParams::builder().privatekey_content("unused").build()
    }

    #[test]
    fn discrete_fields_come_first_in_fixed_order() {
        let mut params = params();
        params.common_name = Some("example.com".to_string());
        params.country_name = Some("US".to_string());
        params.organization_name = Some(String::new());
        params.subject = Some(BTreeMap::from([(
            "OU".to_string(),
            NameValue::Many(vec!["a".to_string(), "b".to_string()]),
        )]));

        let state = DesiredState::from_params(&params).unwrap();
        assert!(!state.subject_ordered);
        assert_eq!(
            state.subject,
            vec![
                (oid::COUNTRY_NAME, "US".to_string()),
                (oid::COMMON_NAME, "example.com".to_string()),
                (oid::ORGANIZATIONAL_UNIT_NAME, "a".to_string()),
                (oid::ORGANIZATIONAL_UNIT_NAME, "b".to_string()),
            ]
        );
    }

    #[test]
    fn ordered_subject_cannot_be_mixed() {
        let mut params = params();
        params.common_name = Some("example.com".to_string());
        params.subject_ordered = Some(vec![BTreeMap::from([(
            "O".to_string(),
            NameValue::One("Example".to_string()),
        )])]);
        let err = DesiredState::from_params(&params).unwrap_err();
        assert!(err.to_string().contains("subject_ordered cannot be combined"));
    }

    #[test]
    fn ordered_subject_entries_need_exactly_one_key() {
        let mut params = params();
        params.subject_ordered = Some(vec![BTreeMap::from([
            ("O".to_string(), NameValue::One("Example".to_string())),
            ("CN".to_string(), NameValue::One("example.com".to_string())),
        ])]);
        assert!(matches!(
            DesiredState::from_params(&params),
            Err(CsrKitError::Configuration(_))
        ));
    }

    #[test]
    fn common_name_is_used_as_san() {
        let mut params = params();
        params.common_name = Some("example.com".to_string());
        let state = DesiredState::from_params(&params).unwrap();
        assert!(state.san_from_common_name);
        assert_eq!(
            state.subject_alt_name,
            Some(Requested::new(vec![TypedName::Dns("example.com".to_string())], false))
        );

        params.use_common_name_for_san = false;
        let state = DesiredState::from_params(&params).unwrap();
        assert!(!state.san_from_common_name);
        assert_eq!(state.subject_alt_name, None);
    }

    #[test]
    fn explicit_san_wins_over_common_name() {
        let mut params = params();
        params.common_name = Some("example.com".to_string());
        params.subject_alt_name = Some(vec!["DNS:www.example.com".to_string()]);
        let state = DesiredState::from_params(&params).unwrap();
        assert!(!state.san_from_common_name);
        assert_eq!(
            state.subject_alt_name.unwrap().value,
            vec![TypedName::Dns("www.example.com".to_string())]
        );
    }

    #[test]
    fn empty_lists_mean_absent() {
        let mut params = params();
        params.key_usage = Some(vec![]);
        params.extended_key_usage = Some(vec![]);
        params.basic_constraints = Some(vec![]);
        params.crl_distribution_points = Some(vec![]);
        let state = DesiredState::from_params(&params).unwrap();
        assert_eq!(state.key_usage, None);
        assert_eq!(state.extended_key_usage, None);
        assert_eq!(state.basic_constraints, None);
        assert_eq!(state.crl_distribution_points, None);
    }

    #[test]
    fn key_usage_and_constraints_keep_criticality() {
        let mut params = params();
        params.key_usage = Some(vec!["digitalSignature".to_string()]);
        params.key_usage_critical = true;
        params.basic_constraints = Some(vec!["CA:TRUE".to_string(), "pathlen:0".to_string()]);
        params.basic_constraints_critical = true;
        let state = DesiredState::from_params(&params).unwrap();
        assert_eq!(
            state.key_usage,
            Some(Requested::new(FlagSet::from(KeyUsages::DigitalSignature), true))
        );
        assert_eq!(
            state.basic_constraints,
            Some(Requested::new(
                BasicConstraintsValue {
                    ca: true,
                    path_length: Some(0)
                },
                true
            ))
        );
    }

    #[test]
    fn hex_identifiers_accept_colons() {
        let mut params = params();
        params.subject_key_identifier = Some("00:11:22:aA".to_string());
        params.authority_key_identifier = Some("0102".to_string());
        let state = DesiredState::from_params(&params).unwrap();
        assert_eq!(
            state.subject_key_identifier,
            SubjectKeyIdentifierMode::Explicit(vec![0x00, 0x11, 0x22, 0xaa])
        );
        assert_eq!(
            state.authority_key_identifier.unwrap().key_identifier,
            Some(vec![1, 2])
        );
    }

    #[test]
    fn malformed_hex_names_the_field() {
        let mut params = params();
        params.authority_key_identifier = Some("zz".to_string());
        let err = DesiredState::from_params(&params).unwrap_err();
        assert!(err.to_string().contains("authority_key_identifier"));
    }

    #[test]
    fn derived_and_explicit_ski_are_exclusive() {
        let mut params = params();
        params.create_subject_key_identifier = true;
        params.subject_key_identifier = Some("00".to_string());
        assert!(matches!(
            DesiredState::from_params(&params),
            Err(CsrKitError::Configuration(_))
        ));
    }

    #[test]
    fn authority_serial_alone_is_kept() {
        let mut params = params();
        params.authority_cert_serial_number = Some(42);
        let state = DesiredState::from_params(&params).unwrap();
        assert_eq!(
            state.authority_key_identifier,
            Some(AuthorityKeyIdentifierValue {
                key_identifier: None,
                issuer: None,
                serial_number: Some(42),
            })
        );
    }

    #[test]
    fn crl_point_errors_carry_their_index() {
        let mut params = params();
        params.crl_distribution_points = Some(vec![
            CrlDistributionPointParams::builder()
                .full_name(vec!["URI:https://ca.example.com/crl".to_string()])
                .build(),
            CrlDistributionPointParams::builder()
                .full_name(vec![])
                .build(),
        ]);
        let err = DesiredState::from_params(&params).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Configuration error: Error while parsing CRL distribution point #1: full_name must not be empty"
        );
    }

    #[test]
    fn crl_points_parse_names_and_reasons() {
        let mut params = params();
        params.crl_distribution_points = Some(vec![
            CrlDistributionPointParams::builder()
                .relative_name(vec!["CN=crl".to_string()])
                .crl_issuer(vec!["dirName:/CN=Example CA".to_string()])
                .reasons(vec!["key_compromise".to_string(), "superseded".to_string()])
                .build(),
        ]);
        let state = DesiredState::from_params(&params).unwrap();
        let points = state.crl_distribution_points.unwrap();
        assert_eq!(points.len(), 1);
        assert!(matches!(
            points[0].distribution_point,
            Some(DistributionPointName::NameRelativeToCRLIssuer(_))
        ));
        assert_eq!(
            points[0].reasons,
            Some(Reasons::KeyCompromise | Reasons::Superseded)
        );
        assert_eq!(points[0].crl_issuer.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn crl_point_needs_a_name_or_issuer() {
        let mut params = params();
        params.crl_distribution_points = Some(vec![
            CrlDistributionPointParams::builder()
                .reasons(vec!["superseded".to_string()])
                .build(),
        ]);
        let err = DesiredState::from_params(&params).unwrap_err();
        assert!(err.to_string().contains("#0"));
    }
}
