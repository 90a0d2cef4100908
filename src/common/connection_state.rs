/// 클라이언트 연결 하나의 처리 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// 초기 상태
    Accepted,
    /// 첫 요청 바이트 대기 중
    ReadPending,
    /// 요청 라인 파싱 실패
    ParseError,
    /// CONNECT 또는 일반 요청으로 분류됨
    Classified,
    /// 응답 전송 후 닫는 중
    RespondedAndClosed,
    /// 터널 모드
    TunnelEstablished,
    /// 닫힘
    Closed,
}

impl ConnectionPhase {
    /// Whether `next` is a legal step from this phase.
    pub fn can_advance_to(self, next: ConnectionPhase) -> bool {
        use ConnectionPhase::*;
        matches!(
            (self, next),
            (Accepted, ReadPending)
                | (ReadPending, ParseError)
                | (ReadPending, Classified)
                | (ParseError, RespondedAndClosed)
                | (Classified, RespondedAndClosed)
                | (Classified, TunnelEstablished)
                | (_, Closed)
        ) && self != Closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_transitions() {
        use ConnectionPhase::*;

        assert!(Accepted.can_advance_to(ReadPending));
        assert!(ReadPending.can_advance_to(Closed));
        assert!(Classified.can_advance_to(TunnelEstablished));
        assert!(!ParseError.can_advance_to(TunnelEstablished));
        assert!(!Closed.can_advance_to(Closed));
    }
}
