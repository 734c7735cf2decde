use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractStatus {
    Pendiente,
    Aprobado,
    Rechazado,
    Arbitraje,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("unknown contract status '{0}'")]
    Unknown(String),
    #[error("cannot transition contract from '{from}' to '{to}'")]
    Invalid {
        from: ContractStatus,
        to: ContractStatus,
    },
}

impl ContractStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractStatus::Pendiente => "pendiente",
            ContractStatus::Aprobado => "aprobado",
            ContractStatus::Rechazado => "rechazado",
            ContractStatus::Arbitraje => "arbitraje",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ContractStatus::Rechazado)
    }

    pub fn can_transition_to(&self, next: ContractStatus) -> bool {
        use ContractStatus::*;
        matches!(
            (self, next),
            (Pendiente, Aprobado)
                | (Pendiente, Rechazado)
                | (Pendiente, Arbitraje)
                | (Aprobado, Arbitraje)
                | (Arbitraje, Aprobado)
                | (Arbitraje, Rechazado)
        )
    }

    pub fn transition_to(&self, next: ContractStatus) -> Result<ContractStatus, TransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TransitionError::Invalid {
                from: *self,
                to: next,
            })
        }
    }
}

impl fmt::Display for ContractStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContractStatus {
    type Err = TransitionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pendiente" => Ok(ContractStatus::Pendiente),
            "aprobado" => Ok(ContractStatus::Aprobado),
            "rechazado" => Ok(ContractStatus::Rechazado),
            "arbitraje" => Ok(ContractStatus::Arbitraje),
            other => Err(TransitionError::Unknown(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ContractStatus::*;
    use super::*;

    #[test]
    fn pending_contract_accepts_every_decision() {
        assert!(Pendiente.can_transition_to(Aprobado));
        assert!(Pendiente.can_transition_to(Rechazado));
        assert!(Pendiente.can_transition_to(Arbitraje));
    }

    #[test]
    fn approved_contract_only_escalates() {
        assert!(Aprobado.can_transition_to(Arbitraje));
        assert!(!Aprobado.can_transition_to(Rechazado));
        assert!(!Aprobado.can_transition_to(Pendiente));
    }

    #[test]
    fn arbitration_resolves_either_way() {
        assert!(Arbitraje.can_transition_to(Aprobado));
        assert!(Arbitraje.can_transition_to(Rechazado));
        assert!(!Arbitraje.can_transition_to(Pendiente));
    }

    #[test]
    fn rejected_is_terminal() {
        assert!(Rechazado.is_terminal());
        for next in [Pendiente, Aprobado, Arbitraje] {
            assert!(!Rechazado.can_transition_to(next));
        }
    }

    #[test]
    fn no_status_transitions_to_itself() {
        for status in [Pendiente, Aprobado, Rechazado, Arbitraje] {
            assert!(!status.can_transition_to(status));
        }
    }

    #[test]
    fn transition_to_reports_both_ends() {
        let err = Aprobado.transition_to(Pendiente).unwrap_err();
        assert_eq!(
            err,
            TransitionError::Invalid {
                from: Aprobado,
                to: Pendiente
            }
        );
    }

    #[test]
    fn wire_names_round_trip() {
        for status in [Pendiente, Aprobado, Rechazado, Arbitraje] {
            assert_eq!(status.as_str().parse::<ContractStatus>().unwrap(), status);
        }
        assert!(matches!(
            "firmado".parse::<ContractStatus>(),
            Err(TransitionError::Unknown(_))
        ));
    }

    #[test]
    fn serde_uses_spanish_wire_names() {
        assert_eq!(serde_json::to_string(&Pendiente).unwrap(), "\"pendiente\"");
        let parsed: ContractStatus = serde_json::from_str("\"arbitraje\"").unwrap();
        assert_eq!(parsed, Arbitraje);
    }
}
