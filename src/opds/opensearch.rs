use crate::opds::mime;
use crate::sanitize::escape_xml;

/// Generate OpenSearch description XML.
pub fn generate_opensearch(title: &str, base_url: &str) -> String {
    let title = escape_xml(title);
    let base_url = escape_xml(base_url);

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<OpenSearchDescription xmlns="http://a9.com/-/spec/opensearch/1.1/">
  <ShortName>{title}</ShortName>
  <Description>Search the {title} catalog</Description>
  <InputEncoding>UTF-8</InputEncoding>
  <OutputEncoding>UTF-8</OutputEncoding>
  <Url type="{mime}" template="{base_url}/opds/search?q={{searchTerms}}"/>
</OpenSearchDescription>"#,
        mime = escape_xml(mime::ACQUISITION_FEED),
    )
}
