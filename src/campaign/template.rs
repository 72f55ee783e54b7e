use crate::campaign::contacts::ContactEntry;

/// Resolve a message template against one contact. `{{nome}}` and
/// `{{numero}}` are substituted literally, then any per-contact vars as
/// `{{key}}`. No nesting, no conditionals; a missing name becomes the
/// empty string. Unknown tokens are left untouched.
pub fn render(template: &str, entry: &ContactEntry) -> String {
    let mut out = template.replace("{{nome}}", entry.name.as_deref().unwrap_or(""));
    out = out.replace("{{numero}}", &entry.number);
    for (key, value) in &entry.vars {
        out = out.replace(&format!("{{{{{}}}}}", key), value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(number: &str, name: Option<&str>) -> ContactEntry {
        ContactEntry::new(number, name.map(|n| n.to_string()))
    }

    #[test]
    fn substitutes_name_and_number() {
        let e = entry("+5511999990001", Some("Ana"));
        let out = render("Olá {{nome}}, código {{numero}}", &e);
        assert_eq!(out, "Olá Ana, código +5511999990001");
        assert!(!out.contains("{{"));
    }

    #[test]
    fn missing_name_substitutes_empty_string() {
        let e = entry("+5511999990002", None);
        let out = render("Olá {{nome}}, código {{numero}}", &e);
        assert_eq!(out, "Olá , código +5511999990002");
    }

    #[test]
    fn vars_fill_custom_tokens() {
        let mut e = entry("+5511999990001", Some("Ana"));
        e.vars.insert("pedido".to_string(), "A-1042".to_string());
        let out = render("{{nome}}, seu pedido {{pedido}} saiu", &e);
        assert_eq!(out, "Ana, seu pedido A-1042 saiu");
    }

    #[test]
    fn unknown_tokens_are_left_alone() {
        let e = entry("+5511999990001", Some("Ana"));
        let out = render("Oi {{nome}} {{desconhecido}}", &e);
        assert_eq!(out, "Oi Ana {{desconhecido}}");
    }

    #[test]
    fn template_without_tokens_passes_through() {
        let e = entry("+5511999990001", None);
        assert_eq!(render("mensagem fixa", &e), "mensagem fixa");
    }
}
