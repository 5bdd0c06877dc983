use caracal_security::captcha::{CANVAS_H, CANVAS_W, CODE_LEN, CaptchaGate, VerifyOutcome};

#[test]
fn issue_then_verify_roundtrip_tolerates_case_and_whitespace() {
    let gate = CaptchaGate::new();
    let (code, _png) = gate.issue(7, 99).unwrap();
    assert_eq!(code.len(), CODE_LEN);

    let sloppy = format!("  {}  \n", code.to_lowercase());
    assert_eq!(
        gate.verify(7, &sloppy),
        VerifyOutcome::Verified { reward_role_id: 99 }
    );

    // po sukcesie wpis znika
    assert!(!gate.has_pending(7));
    assert_eq!(gate.verify(7, &code), VerifyOutcome::NoPendingChallenge);
}

#[test]
fn wrong_answer_keeps_the_challenge_for_a_retry() {
    let gate = CaptchaGate::new();
    let (code, _png) = gate.issue(1, 5).unwrap();

    // kod mógłby się akurat wylosować — weź inny
    let wrong = if code == "AAAAA" { "BBBBB" } else { "AAAAA" };
    assert_eq!(gate.verify(1, wrong), VerifyOutcome::WrongAnswer);
    assert!(gate.has_pending(1));

    // ponowna próba z dobrym kodem przechodzi
    assert_eq!(
        gate.verify(1, &code),
        VerifyOutcome::Verified { reward_role_id: 5 }
    );
}

#[test]
fn verify_without_a_challenge_is_reported_not_thrown() {
    let gate = CaptchaGate::new();
    assert_eq!(gate.verify(42, "ABCDE"), VerifyOutcome::NoPendingChallenge);
}

#[test]
fn reissue_overwrites_the_previous_challenge() {
    let gate = CaptchaGate::new();
    let (first, _) = gate.issue(9, 1).unwrap();
    let (second, _) = gate.issue(9, 2).unwrap();

    // stary kod przestaje działać (o ile losowanie nie dało dwa razy tego samego)
    if first != second {
        assert_eq!(gate.verify(9, &first), VerifyOutcome::WrongAnswer);
    }

    // nowy kod weryfikuje z NOWĄ rolą
    assert_eq!(
        gate.verify(9, &second),
        VerifyOutcome::Verified { reward_role_id: 2 }
    );
    assert!(!gate.has_pending(9));
}

#[test]
fn challenge_image_is_a_png_with_fixed_dimensions() {
    let gate = CaptchaGate::new();
    let (_code, png) = gate.issue(3, 4).unwrap();

    let img = image::load_from_memory(&png).expect("valid PNG");
    assert_eq!(img.width(), CANVAS_W);
    assert_eq!(img.height(), CANVAS_H);
}

#[test]
fn codes_are_uppercase_alphanumeric() {
    let gate = CaptchaGate::new();
    for uid in 0..20u64 {
        let (code, _) = gate.issue(uid, 1).unwrap();
        assert!(code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }
}
