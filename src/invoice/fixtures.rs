//! Detail-page HTML shaped like the portal's invoice view.

pub const DETAIL_LINK: &str = "https://www.fieldglass.net/invoice_detail.do?cf=1&id=123456&sn=5";

pub fn detail_link(id: &str) -> String {
    format!("https://www.fieldglass.net/invoice_detail.do?cf=1&id={id}&sn=5")
}

pub fn detail_page(invoice_number: &str, status: &str, total: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <script type="text/javascript">
    var fdPage = {{ moduleId: 180 }};
  </script>
  <script type="text/javascript">
    $(function() {{
      initBadge({{"title": "Invoice", "items": [
        {{"key": "Status", "value": "{status}"}},
        {{"key": "Submit Date", "value": "03/05/2024"}},
        {{"key": "Buyer", "value": "Acme Corp"}}
      ]}}, 'invoiceBadge');
    }});
  </script>
</head>
<body>
  <div id="invoiceDetails">
    <div class="fd-container">
      <h3>Invoice Details (USD)</h3>
      <table class="box">
        <tr><th>Invoice Code</th><td>{invoice_number}</td></tr>
        <tr><th>PO Number</th><td>PO-778</td></tr>
        <tr><th>End Date</th><td>03/31/2024</td></tr>
        <tr><th>Total Amount Due</th><td>
          {total}
        </td></tr>
      </table>
    </div>
  </div>
</body>
</html>"#
    )
}
