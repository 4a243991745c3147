use super::*;

#[test]
fn display_prefixes_are_stable() {
    assert!(
        MixerError::invalid_operation("x")
            .to_string()
            .contains("invalid operation:")
    );
    assert!(
        MixerError::not_supported("x")
            .to_string()
            .contains("not supported:")
    );
    assert!(
        MixerError::validation("x")
            .to_string()
            .contains("validation error:")
    );
    assert!(MixerError::gpu("x").to_string().contains("gpu error:"));
}

#[test]
fn off_context_is_an_invalid_operation() {
    assert!(matches!(
        MixerError::off_context(),
        MixerError::InvalidOperation(_)
    ));
}

#[test]
fn other_preserves_source() {
    let base = std::io::Error::other("boom");
    let err = MixerError::Other(anyhow::Error::new(base));
    assert!(err.to_string().contains("boom"));
}
