//! Validación del grafo de dependencias y orden topológico (Kahn).

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use crate::errors::EtlError;
use crate::step::PipelineStep;

/// Ordena los steps topológicamente. Entre steps sin dependencia mutua se
/// conserva el orden de declaración.
///
/// # Errores
/// - `DuplicateStep` si dos steps comparten nombre.
/// - `UnknownDependency` si se referencia un step no declarado.
/// - `CyclicDependency` con los steps que forman parte de algún ciclo.
pub(crate) fn topo_sort(steps: &[PipelineStep]) -> Result<Vec<usize>, EtlError> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    for (i, s) in steps.iter().enumerate() {
        if index.insert(s.name.as_str(), i).is_some() {
            return Err(EtlError::DuplicateStep(s.name.clone()));
        }
    }

    let mut indegree = vec![0usize; steps.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); steps.len()];
    for (i, s) in steps.iter().enumerate() {
        for dep in &s.depends_on {
            let Some(&d) = index.get(dep.as_str()) else {
                return Err(EtlError::UnknownDependency { step: s.name.clone(),
                                                         missing: dep.clone() });
            };
            indegree[i] += 1;
            dependents[d].push(i);
        }
    }

    let mut queue: VecDeque<usize> = (0..steps.len()).filter(|i| indegree[*i] == 0).collect();
    let mut order = Vec::with_capacity(steps.len());
    while let Some(i) = queue.pop_front() {
        order.push(i);
        for &n in &dependents[i] {
            indegree[n] -= 1;
            if indegree[n] == 0 {
                queue.push_back(n);
            }
        }
    }

    if order.len() < steps.len() {
        return Err(EtlError::CyclicDependency { steps: cycle_members(steps, &indegree, &dependents) });
    }
    Ok(order)
}

/// De los nodos que Kahn no pudo ordenar, descarta los que sólo cuelgan de
/// un ciclo (sin sucesores pendientes) hasta dejar los que están en él.
fn cycle_members(steps: &[PipelineStep], indegree: &[usize], dependents: &[Vec<usize>]) -> Vec<String> {
    let mut remaining: BTreeSet<usize> = (0..steps.len()).filter(|i| indegree[*i] > 0).collect();
    loop {
        let leaves: Vec<usize> = remaining.iter()
                                          .copied()
                                          .filter(|i| !dependents[*i].iter().any(|n| remaining.contains(n)))
                                          .collect();
        if leaves.is_empty() {
            break;
        }
        for l in leaves {
            remaining.remove(&l);
        }
    }
    let mut names: Vec<String> = remaining.into_iter().map(|i| steps[i].name.clone()).collect();
    names.sort();
    names
}

/// Ancestros (directos y transitivos) de cada step.
pub(crate) fn ancestors(steps: &[PipelineStep]) -> BTreeMap<String, BTreeSet<String>> {
    let by_name: HashMap<&str, &PipelineStep> = steps.iter().map(|s| (s.name.as_str(), s)).collect();
    let mut out = BTreeMap::new();
    for s in steps {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<&str> = s.depends_on.iter().map(String::as_str).collect();
        while let Some(name) = stack.pop() {
            if seen.insert(name.to_string()) {
                if let Some(dep) = by_name.get(name) {
                    stack.extend(dep.depends_on.iter().map(String::as_str));
                }
            }
        }
        out.insert(s.name.clone(), seen);
    }
    out
}
