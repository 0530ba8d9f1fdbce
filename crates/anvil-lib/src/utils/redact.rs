//! Scrubbing of secrets from anything that reaches a log line.

const MASK: &str = "********";

/// Flags whose following argument is a credential.
const SECRET_FLAGS: &[&str] = &["--accessToken", "--session", "--xuid", "--clientId"];

/// Replaces every occurrence of the given secrets, plus values that follow a
/// known credential flag, with a fixed mask.
pub fn redact_args(args: &[String], secrets: &[&str]) -> Vec<String> {
    let mut out = Vec::with_capacity(args.len());
    let mut mask_next = false;
    for arg in args {
        if mask_next {
            out.push(MASK.to_string());
            mask_next = false;
            continue;
        }
        if SECRET_FLAGS.contains(&arg.as_str()) {
            mask_next = true;
            out.push(arg.clone());
            continue;
        }
        out.push(redact_text(arg, secrets));
    }
    out
}

/// Masks secrets inside free text such as captured stderr.
pub fn redact_text(text: &str, secrets: &[&str]) -> String {
    let mut result = text.to_string();
    for secret in secrets {
        // very short values (offline "0" tokens) would mask half the line
        if secret.len() >= 8 {
            result = result.replace(secret, MASK);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_values_after_token_flags() {
        let args: Vec<String> = ["--username", "Steve", "--accessToken", "eyJhbGciOi.secret"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let out = redact_args(&args, &[]);
        assert_eq!(out, vec!["--username", "Steve", "--accessToken", MASK]);
    }

    #[test]
    fn masks_embedded_secrets() {
        let token = "abcdef0123456789";
        let args = vec![format!("-Dauth={}", token)];
        assert_eq!(redact_args(&args, &[token]), vec![format!("-Dauth={}", MASK)]);
        assert_eq!(redact_text("token=0", &["0"]), "token=0");
    }
}
