use crate::domain::deal::AnalyzedDeal;

pub fn risk_alert_text(high_risk: &[AnalyzedDeal]) -> String {
    if high_risk.is_empty() {
        return "✅ All deals analyzed. No high-risk deals detected.".to_string();
    }

    let mut message = format!(
        "⚠️ *{} High-Risk Deal(s) Detected*\n\n",
        high_risk.len()
    );
    for deal in high_risk {
        message.push_str(&format!(
            "• *{}* - Risk Score: {}\n  Reason: {}\n\n",
            deal.deal_name, deal.risk_score, deal.risk_reason
        ));
    }
    message
}

pub fn summary_text(total: usize, high_risk_count: usize, avg_score: f64) -> String {
    format!(
        "📊 *Analysis Complete*\n\
• Total Deals: {total}\n\
• High-Risk Deals: {high_risk_count}\n\
• Average Risk Score: {avg_score:.1}"
    )
}
